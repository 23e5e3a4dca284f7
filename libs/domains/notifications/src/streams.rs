//! Subscription definitions for the notifications domain.

use stream_worker::StreamDef;

/// Notifications to be emailed one by one as they arrive.
pub struct ImmediateStream;

impl StreamDef for ImmediateStream {
    const STREAM_NAME: &'static str = "email-notifications:immediate";
    const CONSUMER_GROUP: &'static str = "email-notifications-immediate-sub";
}

/// Notifications accumulated into the daily digest.
pub struct DailyStream;

impl StreamDef for DailyStream {
    const STREAM_NAME: &'static str = "email-notifications:daily";
    const CONSUMER_GROUP: &'static str = "email-notifications-daily-sub";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_defs() {
        assert_eq!(ImmediateStream::stream_name(), "email-notifications:immediate");
        assert_eq!(ImmediateStream::consumer_group(), "email-notifications-immediate-sub");
        assert_eq!(DailyStream::stream_name(), "email-notifications:daily");
        assert_eq!(DailyStream::consumer_group(), "email-notifications-daily-sub");
    }
}
