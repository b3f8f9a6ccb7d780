/// Largest value of the sequence using a total order, `None` when empty
pub fn max_of(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values.into_iter().max_by(|a, b| a.total_cmp(b))
}

/// `1 / denom`, or zero when there is nothing to normalize
pub fn normalizer(denom: f64) -> f64 {
    if denom > 0.0 && denom.is_finite() {
        1.0 / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_of_values() {
        assert_eq!(max_of(vec![1.0, 5.0, 3.0]), Some(5.0));
        assert_eq!(max_of(Vec::new()), None);
    }

    #[test]
    fn degenerate_normalizer() {
        assert_eq!(normalizer(0.0), 0.0);
        assert_eq!(normalizer(4.0), 0.25);
    }
}
