use std::sync::{Arc, Mutex};

use guardian_keeper::status::{StatusDocument, StatusError, StatusSink};

/// Keeps every status document written to it.
#[derive(Clone, Default)]
pub(crate) struct MemoryStatusSink {
    documents: Arc<Mutex<Vec<StatusDocument>>>,
}

impl MemoryStatusSink {
    pub(crate) fn writes(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub(crate) fn last(&self) -> Option<StatusDocument> {
        self.documents.lock().unwrap().last().cloned()
    }
}

impl StatusSink for MemoryStatusSink {
    fn write(&mut self, document: &StatusDocument) -> Result<(), StatusError> {
        self.documents.lock().unwrap().push(document.clone());
        Ok(())
    }
}
