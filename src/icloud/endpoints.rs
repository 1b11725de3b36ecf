use crate::types::Domain;

/// URL roots for the iCloud web services used by the sync.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub home: &'static str,
    pub setup: &'static str,
}

impl Endpoints {
    pub fn for_domain(domain: Domain) -> Self {
        match domain {
            Domain::Com => Self {
                home: "https://www.icloud.com",
                setup: "https://setup.icloud.com/setup/ws/1",
            },
            Domain::Cn => Self {
                home: "https://www.icloud.com.cn",
                setup: "https://setup.icloud.com.cn/setup/ws/1",
            },
        }
    }
}
