use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("parley.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("parley.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("parley.client.request_duration_seconds");

pub(crate) static STREAM_CHUNKS: Counter = Counter::new("parley.stream.chunks");
pub(crate) static STREAM_FRAGMENTS: Counter = Counter::new("parley.stream.fragments");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("parley.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("parley.stream.bytes");
pub(crate) static STREAM_TTFB: Moments = Moments::new("parley.stream.ttfb_seconds");

pub(crate) static CHAT_TURNS: Counter = Counter::new("parley.chat.turns");
pub(crate) static CHAT_TURN_FAILURES: Counter = Counter::new("parley.chat.turn_failures");
pub(crate) static CHAT_TURN_CANCELLATIONS: Counter =
    Counter::new("parley.chat.turn_cancellations");
pub(crate) static CHAT_TURNS_REJECTED: Counter = Counter::new("parley.chat.turns_rejected");
pub(crate) static CHAT_IMAGE_TURNS: Counter = Counter::new("parley.chat.image_turns");
pub(crate) static CHAT_TURN_DURATION: Moments = Moments::new("parley.chat.turn_duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_FRAGMENTS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFB);

    collector.register_counter(&CHAT_TURNS);
    collector.register_counter(&CHAT_TURN_FAILURES);
    collector.register_counter(&CHAT_TURN_CANCELLATIONS);
    collector.register_counter(&CHAT_TURNS_REJECTED);
    collector.register_counter(&CHAT_IMAGE_TURNS);
    collector.register_moments(&CHAT_TURN_DURATION);
}
