/// Store key names derived from a queue name
///
/// `name` holds pending items, `name_processing` the claimed ones ordered by
/// deadline, `name_error` the items the engine gave up on. The processing
/// set keeps two companion hashes: the claimed records and their delivery
/// counts. Notifications go out on a channel named after the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub source: String,
    pub processing: String,
    pub processing_items: String,
    pub deliveries: String,
    pub error: String,
    pub channel: String,
}

impl QueueKeys {
    pub fn new(name: &str) -> Self {
        let processing = format!("{}_processing", name);
        Self {
            source: name.to_string(),
            processing_items: format!("{}:items", processing),
            deliveries: format!("{}:deliveries", processing),
            processing,
            error: format!("{}_error", name),
            channel: name.to_string(),
        }
    }

    /// Every key owned by this queue
    pub fn all(&self) -> Vec<String> {
        vec![
            self.source.clone(),
            self.processing.clone(),
            self.processing_items.clone(),
            self.deliveries.clone(),
            self.error.clone(),
        ]
    }

    /// The processing set together with its companion hashes
    pub fn processing_group(&self) -> Vec<String> {
        vec![
            self.processing.clone(),
            self.processing_items.clone(),
            self.deliveries.clone(),
        ]
    }
}
