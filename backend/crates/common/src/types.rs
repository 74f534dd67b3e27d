use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a running mirra process, served from `/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub instance_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl ServiceInfo {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            instance_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_instance_gets_its_own_id() {
        let a = ServiceInfo::new("mirra-api");
        let b = ServiceInfo::new("mirra-api");
        assert_eq!(a.service, "mirra-api");
        assert_ne!(a.instance_id, b.instance_id);
    }
}
