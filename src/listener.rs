use crate::sample::LocationSample;
use crate::session::ConnectionState;

/// Receives push notifications from a tracking session.
///
/// Callbacks run on the session's worker task while the session's delivery
/// gate is held, so they should return quickly. A callback may call
/// [`TrackingHandle::cancel`](crate::TrackingHandle::cancel) on its own
/// session; nothing is delivered after that call returns.
///
/// # Example
///
/// ```ignore
/// use fleet_tracker::{LocationListener, LocationSample, ConnectionState};
///
/// struct MapMarker;
///
/// impl LocationListener for MapMarker {
///     fn on_sample(&self, entity_id: &str, sample: &LocationSample) {
///         println!("{} at {},{}", entity_id, sample.latitude, sample.longitude);
///     }
///
///     fn on_state_change(&self, entity_id: &str, state: ConnectionState) {
///         println!("{} is now {:?}", entity_id, state);
///     }
/// }
/// ```
pub trait LocationListener: Send + Sync + 'static {
    /// Called for every accepted sample, in timestamp order.
    fn on_sample(&self, entity_id: &str, sample: &LocationSample);

    /// Called when the session moves between Connecting, Open and
    /// Reconnecting. Not called for Closed.
    fn on_state_change(&self, _entity_id: &str, _state: ConnectionState) {}
}

impl<F> LocationListener for F
where
    F: Fn(&str, &LocationSample) + Send + Sync + 'static,
{
    fn on_sample(&self, entity_id: &str, sample: &LocationSample) {
        self(entity_id, sample)
    }
}
