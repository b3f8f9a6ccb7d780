/// Colored, filtered backtraces for panics. Should be installed before anything else.
pub fn setup() {
    color_backtrace::install();
}
