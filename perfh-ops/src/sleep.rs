use std::sync::Arc;
use std::time::Duration;

use perfh_core::{
    Operation, OperationContext, OperationFactory, OperationResult, OperationSettings, Step,
    WorkerIdentity,
};

use crate::Result;

const DEFAULT_SLEEP: Duration = Duration::from_millis(10);

/// Simulates a fixed-latency request by sleeping. A stop cuts the sleep short.
#[derive(Debug, Clone, Copy)]
pub struct SleepOperation {
    duration: Duration,
}

impl SleepOperation {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Operation for SleepOperation {
    fn step(&mut self, ctx: &OperationContext) -> OperationResult<Step> {
        if ctx.sleep(self.duration) {
            return Ok(Step::Done);
        }
        Ok(Step::Continue)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SleepFactory {
    duration: Duration,
}

impl SleepFactory {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn from_settings(settings: &OperationSettings) -> Result<Self> {
        let duration = settings.duration("duration")?.unwrap_or(DEFAULT_SLEEP);
        Ok(Self::new(duration))
    }
}

impl OperationFactory for SleepFactory {
    fn create(&self, _worker: &WorkerIdentity) -> OperationResult<Box<dyn Operation>> {
        Ok(Box::new(SleepOperation::new(self.duration)))
    }
}

pub(crate) fn factory(settings: &OperationSettings) -> Result<Arc<dyn OperationFactory>> {
    Ok(Arc::new(SleepFactory::from_settings(settings)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_ten_millis() {
        let f = SleepFactory::from_settings(&OperationSettings::new())
            .unwrap_or_else(|e| panic!("settings rejected: {e}"));
        assert_eq!(f.duration, DEFAULT_SLEEP);
    }

    #[test]
    fn reads_duration_setting() {
        let settings = OperationSettings::new().with("duration", "250ms");
        let f = SleepFactory::from_settings(&settings)
            .unwrap_or_else(|e| panic!("settings rejected: {e}"));
        assert_eq!(f.duration, Duration::from_millis(250));

        let bad = OperationSettings::new().with("duration", "soon");
        assert!(SleepFactory::from_settings(&bad).is_err());
    }
}
