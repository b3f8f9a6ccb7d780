//! A layer that forwards every callback to a runtime-built list of boxed layers.
//!
//! `tracing-subscriber` composes layers statically. The set of outputs here comes
//! from the configuration file, so it is only known after startup.
use std::ops::ControlFlow;

use tracing_core::{
    callsite, span,
    subscriber::{Interest, Subscriber},
    Event, Metadata,
};
use tracing_subscriber::layer::{Context, Layer as LayerTrait};

type BoxedLayer<S> = Box<dyn LayerTrait<S> + Send + Sync + 'static>;

pub struct Fanout<S> {
    layers: Vec<BoxedLayer<S>>,
}

impl<S> LayerTrait<S> for Fanout<S>
where
    S: Subscriber,
{
    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        // stop at the first layer that says `never` or `sometimes`, filters must be reevaluated
        let folded = self.layers.iter().try_fold(Interest::always(), |acc, layer| {
            if acc.is_always() {
                ControlFlow::Continue(layer.register_callsite(metadata))
            } else {
                ControlFlow::Break(acc)
            }
        });
        match folded {
            ControlFlow::Break(interest) | ControlFlow::Continue(interest) => interest,
        }
    }

    fn enabled(&self, metadata: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        self.layers.iter().all(|layer| layer.enabled(metadata, ctx.clone()))
    }

    fn new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        self.layers
            .iter()
            .for_each(|layer| layer.new_span(attrs, id, ctx.clone()));
    }

    fn on_record(&self, span: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        self.layers
            .iter()
            .for_each(|layer| layer.on_record(span, values, ctx.clone()));
    }

    fn on_follows_from(&self, span: &span::Id, follows: &span::Id, ctx: Context<'_, S>) {
        self.layers
            .iter()
            .for_each(|layer| layer.on_follows_from(span, follows, ctx.clone()));
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        self.layers
            .iter()
            .for_each(|layer| layer.on_event(event, ctx.clone()));
    }

    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        self.layers
            .iter()
            .for_each(|layer| layer.on_enter(id, ctx.clone()));
    }

    fn on_exit(&self, id: &span::Id, ctx: Context<'_, S>) {
        self.layers
            .iter()
            .for_each(|layer| layer.on_exit(id, ctx.clone()));
    }

    fn on_close(&self, id: span::Id, ctx: Context<'_, S>) {
        self.layers
            .iter()
            .for_each(|layer| layer.on_close(id.clone(), ctx.clone()));
    }

    fn on_id_change(&self, old: &span::Id, new: &span::Id, ctx: Context<'_, S>) {
        self.layers
            .iter()
            .for_each(|layer| layer.on_id_change(old, new, ctx.clone()));
    }
}

impl<S> Fanout<S>
where
    S: Subscriber,
{
    pub fn empty() -> Self {
        Self { layers: vec![] }
    }

    pub fn push<L>(&mut self, layer: L) -> &mut Self
    where
        L: LayerTrait<S> + Send + Sync + 'static,
    {
        self.layers.push(Box::new(layer));
        callsite::rebuild_interest_cache();
        self
    }
}

impl<S, L> Extend<L> for Fanout<S>
where
    S: Subscriber,
    L: LayerTrait<S> + Send + Sync + 'static,
{
    fn extend<T>(&mut self, iter: T)
    where
        T: IntoIterator<Item = L>,
    {
        self.layers
            .extend(iter.into_iter().map(|l| -> BoxedLayer<S> { Box::new(l) }));
        callsite::rebuild_interest_cache();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    /// Counts the events it sees
    struct Counter(Arc<AtomicUsize>);

    impl<S: Subscriber> LayerTrait<S> for Counter {
        fn on_event(&self, _event: &Event<'_>, _ctx: Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn every_layer_sees_every_event() {
        let first = Arc::new(AtomicUsize::new(0));
        let rest = Arc::new(AtomicUsize::new(0));

        let mut fanout = Fanout::empty();
        fanout.push(Counter(Arc::clone(&first)));
        fanout.extend(vec![Counter(Arc::clone(&rest)), Counter(Arc::clone(&rest))]);

        let subscriber = Registry::default().with(fanout);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("one");
            tracing::warn!("two");
        });

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(rest.load(Ordering::SeqCst), 4);
    }
}
