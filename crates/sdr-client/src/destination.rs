//! Deterministic multicast destination derivation.
//!
//! Each receiver derives its own destination group from
//! `SHA-256("GRAPE:<station_id>:<instrument_id>")` rather than being
//! assigned one, so the orchestrator's anti-hijacking rule ("only modify
//! channels at our own destination") holds without a coordination
//! service: two receivers with different station/instrument IDs land on
//! different addresses almost certainly, and the same receiver always
//! rederives the same address across restarts.

use sha2::{Digest, Sha256};

/// Administratively-scoped multicast range this system draws from:
/// 239.0.0.0/8, per RFC 2365, avoiding the reserved 239.255.0.0/16
/// (local/site scopes commonly squatted by other protocols) and the
/// all-zero/all-ones host parts.
fn is_usable_octets(b: [u8; 3]) -> bool {
    if b[0] == 255 {
        return false; // avoid 239.255.0.0/16
    }
    if b[1] == 0 && b[2] == 0 {
        return false; // avoid the all-zero host part
    }
    if b[1] == 255 && b[2] == 255 {
        return false; // avoid the all-ones (broadcast-like) host part
    }
    true
}

/// Derives `239.X.Y.Z` for this `(station_id, instrument_id)` pair. If
/// the initial hash lands on a reserved octet combination, the digest is
/// rehashed until it lands on a usable one — deterministic, since the
/// rehash-or-not decision depends only on the inputs.
pub fn derive_multicast_destination(station_id: &str, instrument_id: &str) -> std::net::Ipv4Addr {
    let mut input = format!("GRAPE:{station_id}:{instrument_id}");
    loop {
        let digest = Sha256::digest(input.as_bytes());
        let octets = [digest[0], digest[1], digest[2]];
        if is_usable_octets(octets) {
            return std::net::Ipv4Addr::new(239, octets[0], octets[1], octets[2]);
        }
        input.push('#');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_multicast_destination("KC2ZAH", "grape-01");
        let b = derive_multicast_destination("KC2ZAH", "grape-01");
        assert_eq!(a, b);
    }

    #[test]
    fn different_instruments_usually_derive_different_addresses() {
        let a = derive_multicast_destination("KC2ZAH", "grape-01");
        let b = derive_multicast_destination("KC2ZAH", "grape-02");
        assert_ne!(a, b);
    }

    #[test]
    fn derived_address_is_in_administratively_scoped_range() {
        let addr = derive_multicast_destination("KC2ZAH", "grape-01");
        assert_eq!(addr.octets()[0], 239);
        assert_ne!(addr.octets()[1], 255);
    }
}
