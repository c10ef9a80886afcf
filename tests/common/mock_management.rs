use std::{
    sync::{Arc, Mutex},
    time::SystemTime,
};

use guardian_keeper::{
    management::{CommitteeSource, ManagementError},
    types::committee::CommitteeView,
};

/// A management service whose answer the test can change between ticks.
#[derive(Clone)]
pub(crate) struct MockManagement {
    response: Arc<Mutex<Result<CommitteeView, ManagementError>>>,
}

impl MockManagement {
    pub(crate) fn new(view: CommitteeView) -> Self {
        Self {
            response: Arc::new(Mutex::new(Ok(view))),
        }
    }

    pub(crate) fn respond(&self, response: Result<CommitteeView, ManagementError>) {
        *self.response.lock().unwrap() = response;
    }
}

impl CommitteeSource for MockManagement {
    fn fetch(&mut self, _: SystemTime) -> Result<CommitteeView, ManagementError> {
        self.response.lock().unwrap().clone()
    }
}
