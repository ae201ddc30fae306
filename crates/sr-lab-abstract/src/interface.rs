use crate::segment::Segment;

/// Capabilities the simulator hands to an endpoint for the duration of one
/// event handler.
pub trait SystemContext {
    /// Hand a segment to the unreliable channel toward the peer.
    fn transmit(&mut self, segment: Segment);

    /// Start the endpoint's single timer. Starting a running timer restarts it.
    fn start_timer(&mut self, delay: u64);

    /// Stop the endpoint's timer. No-op if it is not running.
    fn stop_timer(&mut self);

    /// Deliver a completed message to the application layer.
    fn deliver_data(&mut self, data: &[u8]);

    /// Log a message to the simulator's debug output.
    fn log(&mut self, message: &str);

    /// Current simulation time.
    fn now(&self) -> u64;

    /// Record a numeric metric for reports (e.g. in-flight segments).
    fn record_metric(&mut self, _name: &str, _value: f64) {}
}

/// An endpoint driven by the simulator's event loop.
pub trait TransportProtocol {
    /// Called once before any other event.
    fn init(&mut self, _ctx: &mut dyn SystemContext) {}

    /// A segment arrived from the channel.
    fn on_segment(&mut self, ctx: &mut dyn SystemContext, segment: Segment);

    /// The endpoint's timer expired.
    fn on_timer(&mut self, ctx: &mut dyn SystemContext);

    /// The application wants `data` delivered reliably.
    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]);
}
