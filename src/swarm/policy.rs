use std::collections::HashSet;
use std::net::IpAddr;

/// Coarse IP filter applied to non super-peers before contacting them.
///
/// When an allow-list is configured only listed addresses are contacted and
/// the deny-list is ignored. Otherwise every address not on the deny-list is
/// contacted.
#[derive(Debug, Clone, Default)]
pub struct ContactPolicy {
    allow: HashSet<IpAddr>,
    deny: HashSet<IpAddr>,
}

impl ContactPolicy {
    /// A policy that contacts everyone.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn allow_only<I: IntoIterator<Item = IpAddr>>(ips: I) -> Self {
        Self {
            allow: ips.into_iter().collect(),
            deny: HashSet::new(),
        }
    }

    pub fn deny<I: IntoIterator<Item = IpAddr>>(ips: I) -> Self {
        Self {
            allow: HashSet::new(),
            deny: ips.into_iter().collect(),
        }
    }

    pub fn with_allowed(mut self, ip: IpAddr) -> Self {
        self.allow.insert(ip);
        self
    }

    pub fn with_denied(mut self, ip: IpAddr) -> Self {
        self.deny.insert(ip);
        self
    }

    pub fn permits(&self, ip: IpAddr) -> bool {
        if !self.allow.is_empty() {
            return self.allow.contains(&ip);
        }
        !self.deny.contains(&ip)
    }
}
