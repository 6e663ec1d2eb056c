use std::sync::Arc;

use perfh_core::{
    Operation, OperationContext, OperationFactory, OperationResult, OperationSettings, Step,
    WorkerIdentity,
};

use crate::Result;

/// Does nothing, as fast as the pacer allows. Measures harness overhead.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOperation;

impl Operation for NoopOperation {
    fn step(&mut self, _ctx: &OperationContext) -> OperationResult<Step> {
        Ok(Step::Continue)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFactory;

impl OperationFactory for NoopFactory {
    fn create(&self, _worker: &WorkerIdentity) -> OperationResult<Box<dyn Operation>> {
        Ok(Box::new(NoopOperation))
    }
}

pub(crate) fn factory(_settings: &OperationSettings) -> Result<Arc<dyn OperationFactory>> {
    Ok(Arc::new(NoopFactory))
}
