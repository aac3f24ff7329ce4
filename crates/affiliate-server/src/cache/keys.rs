//! Cache key namespaces.

pub fn affiliate(affiliate_id: &str) -> String {
    format!("affiliate:{affiliate_id}")
}

pub const METRICS: &str = "metrics:all";

pub const HEALTH: &str = "health:status";

#[cfg(test)]
mod tests {
    #[test]
    fn keys_are_namespaced() {
        assert_eq!(super::affiliate("abc"), "affiliate:abc");
        assert_eq!(super::METRICS, "metrics:all");
        assert_eq!(super::HEALTH, "health:status");
    }
}
