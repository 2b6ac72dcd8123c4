/// Broadcast addresses of the host's IPv4 interfaces
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Subnet broadcast of every non-loopback IPv4 interface, or the global
/// broadcast when none can be found
pub fn detect_broadcast_targets() -> Vec<Ipv4Addr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("Could not enumerate network interfaces: {}", e);
            return vec![Ipv4Addr::BROADCAST];
        }
    };

    let subnets = interfaces.iter().filter(|iface| !iface.is_loopback()).filter_map(|iface| {
        match &iface.addr {
            if_addrs::IfAddr::V4(v4) => {
                debug!("Interface {} has {}/{}", iface.name, v4.ip, v4.netmask);
                Some((v4.ip, v4.netmask, v4.broadcast))
            }
            _ => None,
        }
    });

    broadcast_targets(subnets)
}

/// Reduce `(ip, netmask, reported broadcast)` triples to a deduplicated
/// target list
pub fn broadcast_targets<I>(subnets: I) -> Vec<Ipv4Addr>
where
    I: IntoIterator<Item = (Ipv4Addr, Ipv4Addr, Option<Ipv4Addr>)>,
{
    let mut targets: Vec<Ipv4Addr> = Vec::new();
    for (ip, netmask, reported) in subnets {
        // Point-to-point links have no subnet to broadcast into
        if netmask == Ipv4Addr::BROADCAST {
            continue;
        }
        let target = reported.unwrap_or_else(|| Ipv4Addr::from(u32::from(ip) | !u32::from(netmask)));
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    if targets.is_empty() {
        targets.push(Ipv4Addr::BROADCAST);
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_from_netmask() {
        let targets = broadcast_targets([(
            Ipv4Addr::new(192, 168, 1, 34),
            Ipv4Addr::new(255, 255, 255, 0),
            None,
        )]);
        assert_eq!(targets, vec![Ipv4Addr::new(192, 168, 1, 255)]);
    }

    #[test]
    fn test_reported_broadcast_wins_and_duplicates_collapse() {
        let targets = broadcast_targets([
            (
                Ipv4Addr::new(10, 0, 3, 7),
                Ipv4Addr::new(255, 255, 252, 0),
                Some(Ipv4Addr::new(10, 0, 3, 255)),
            ),
            (Ipv4Addr::new(10, 0, 2, 9), Ipv4Addr::new(255, 255, 252, 0), None),
            (Ipv4Addr::new(172, 16, 0, 1), Ipv4Addr::BROADCAST, None),
        ]);
        assert_eq!(targets, vec![Ipv4Addr::new(10, 0, 3, 255)]);
    }

    #[test]
    fn test_no_interfaces_falls_back_to_global_broadcast() {
        let none: Vec<(Ipv4Addr, Ipv4Addr, Option<Ipv4Addr>)> = Vec::new();
        assert_eq!(broadcast_targets(none), vec![Ipv4Addr::BROADCAST]);
    }

    #[test]
    fn test_detection_never_returns_empty() {
        assert!(!detect_broadcast_targets().is_empty());
    }
}
