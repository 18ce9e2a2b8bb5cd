//! Sink for failures that happen away from the caller, such as background uploads

use std::error::Error;
use tracing::error;

pub trait EventReporter: Send + Sync {
    fn report(&self, topic: &str, error: &(dyn Error + 'static));
}

/// Reports through the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl EventReporter for LogReporter {
    fn report(&self, topic: &str, error: &(dyn Error + 'static)) {
        error!(topic, "{}", error);
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Keeps every report for assertions
    #[derive(Default)]
    pub struct RecordingReporter {
        pub reports: Mutex<Vec<(String, String)>>,
    }

    impl RecordingReporter {
        pub fn topics(&self) -> Vec<String> {
            self.reports.lock().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    impl EventReporter for RecordingReporter {
        fn report(&self, topic: &str, error: &(dyn Error + 'static)) {
            self.reports
                .lock()
                .push((topic.to_string(), error.to_string()));
        }
    }
}
