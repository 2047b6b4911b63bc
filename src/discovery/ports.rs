//! Ownership label check and port selection.

use std::collections::BTreeMap;

use crate::discovery::lookup::ServicePortRecord;
use crate::discovery::ServiceEndpoint;

pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const OWNER_LABEL_VALUE: &str = "cryostat";

/// True when both ownership labels are present with the exact expected value.
pub fn has_ownership_labels(labels: &BTreeMap<String, String>) -> bool {
    [PART_OF_LABEL, COMPONENT_LABEL]
        .iter()
        .all(|key| labels.get(*key).map(String::as_str) == Some(OWNER_LABEL_VALUE))
}

/// Pick the port to proxy to.
///
/// Ports declaring `appProtocol` are considered first; port names ending in
/// `https`/`http` are only consulted when no port declares one. Within a pass
/// an https port ends the scan, while http ports are remembered and the last
/// one seen wins.
pub fn select_port(ports: &[ServicePortRecord]) -> Option<ServiceEndpoint> {
    scan(ports, |port| port.app_protocol.as_deref().map(Protocol::exact))
        .or_else(|| scan(ports, |port| port.name.as_deref().map(Protocol::suffix)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Https,
    Http,
    Other,
}

impl Protocol {
    fn exact(tag: &str) -> Self {
        match tag {
            "https" => Protocol::Https,
            "http" => Protocol::Http,
            _ => Protocol::Other,
        }
    }

    fn suffix(name: &str) -> Self {
        if name.ends_with("https") {
            Protocol::Https
        } else if name.ends_with("http") {
            Protocol::Http
        } else {
            Protocol::Other
        }
    }
}

fn scan<F>(ports: &[ServicePortRecord], classify: F) -> Option<ServiceEndpoint>
where
    F: Fn(&ServicePortRecord) -> Option<Protocol>,
{
    let mut selected = None;
    for port in ports {
        match classify(port) {
            Some(Protocol::Https) => {
                return Some(ServiceEndpoint {
                    uses_tls: true,
                    port: port.port,
                })
            }
            Some(Protocol::Http) => {
                selected = Some(ServiceEndpoint {
                    uses_tls: false,
                    port: port.port,
                })
            }
            _ => {}
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(port: u16, name: Option<&str>, app_protocol: Option<&str>) -> ServicePortRecord {
        ServicePortRecord {
            name: name.map(String::from),
            port,
            app_protocol: app_protocol.map(String::from),
        }
    }

    fn owned_labels() -> BTreeMap<String, String> {
        BTreeMap::from([
            (PART_OF_LABEL.to_string(), "cryostat".to_string()),
            (COMPONENT_LABEL.to_string(), "cryostat".to_string()),
            ("app.kubernetes.io/name".to_string(), "cryostat".to_string()),
        ])
    }

    #[test]
    fn https_app_protocol_beats_earlier_http() {
        let ports = [
            port(8181, None, Some("http")),
            port(8443, None, Some("https")),
        ];
        assert_eq!(
            select_port(&ports),
            Some(ServiceEndpoint {
                uses_tls: true,
                port: 8443
            })
        );
    }

    #[test]
    fn https_short_circuits_the_scan() {
        let ports = [
            port(8443, None, Some("https")),
            port(9443, None, Some("https")),
            port(8181, None, Some("http")),
        ];
        assert_eq!(select_port(&ports).unwrap().port, 8443);
    }

    #[test]
    fn last_http_match_wins() {
        let ports = [
            port(8181, None, Some("http")),
            port(9091, None, Some("grpc")),
            port(8282, None, Some("http")),
        ];
        assert_eq!(
            select_port(&ports),
            Some(ServiceEndpoint {
                uses_tls: false,
                port: 8282
            })
        );
    }

    #[test]
    fn name_suffix_used_without_app_protocol() {
        let ports = [port(9090, Some("custom-http"), None)];
        assert_eq!(
            select_port(&ports),
            Some(ServiceEndpoint {
                uses_tls: false,
                port: 9090
            })
        );

        let ports = [
            port(8181, Some("web-http"), None),
            port(8443, Some("web-https"), None),
            port(9443, Some("other-https"), None),
        ];
        assert_eq!(
            select_port(&ports),
            Some(ServiceEndpoint {
                uses_tls: true,
                port: 8443
            })
        );
    }

    #[test]
    fn app_protocol_pass_wins_over_names() {
        let ports = [
            port(8443, Some("web-https"), None),
            port(8181, Some("plain"), Some("http")),
        ];
        assert_eq!(
            select_port(&ports),
            Some(ServiceEndpoint {
                uses_tls: false,
                port: 8181
            })
        );
    }

    #[test]
    fn no_suitable_port() {
        let ports = [
            port(5432, Some("postgres"), Some("tcp")),
            port(9091, Some("jfr-datasource"), None),
        ];
        assert_eq!(select_port(&ports), None);
        assert_eq!(select_port(&[]), None);
    }

    #[test]
    fn ownership_labels_required() {
        assert!(has_ownership_labels(&owned_labels()));

        let mut labels = owned_labels();
        labels.remove(COMPONENT_LABEL);
        assert!(!has_ownership_labels(&labels));

        let mut labels = owned_labels();
        labels.insert(PART_OF_LABEL.to_string(), "something-else".to_string());
        assert!(!has_ownership_labels(&labels));

        assert!(!has_ownership_labels(&BTreeMap::new()));
    }
}
