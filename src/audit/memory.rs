use super::{AccessRecord, AuditSink, ServiceRecord};
use crate::types::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

/// In-process audit sink. Used by tests and one-shot CLI runs without a database.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    access: Mutex<Vec<AccessRecord>>,
    service: Mutex<Vec<ServiceRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access_records(&self) -> Vec<AccessRecord> {
        self.access.lock().clone()
    }

    pub fn service_records(&self) -> Vec<ServiceRecord> {
        self.service.lock().clone()
    }

    /// Service records belonging to one request
    pub fn service_records_for(&self, request_id: &str) -> Vec<ServiceRecord> {
        self.service
            .lock()
            .iter()
            .filter(|r| r.request_id == request_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append_access(&self, record: AccessRecord) -> Result<()> {
        self.access.lock().push(record);
        Ok(())
    }

    async fn append_service(&self, record: ServiceRecord) -> Result<()> {
        self.service.lock().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ServiceKind;

    #[tokio::test]
    async fn test_records_are_appended_in_order() {
        let sink = MemoryAuditSink::new();
        for name in ["ana", "luis"] {
            sink.append_service(ServiceRecord::attempt(
                "req-1",
                ServiceKind::Verification,
                name,
                "http://agent/verify",
                4,
            ))
            .await
            .unwrap();
        }
        sink.append_service(ServiceRecord::attempt(
            "req-2",
            ServiceKind::Qa,
            "qa",
            "http://qa/ask",
            4,
        ))
        .await
        .unwrap();

        let records = sink.service_records_for("req-1");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].service_name, "ana");
        assert_eq!(sink.service_records().len(), 3);
        assert!(sink.access_records().is_empty());
    }
}
