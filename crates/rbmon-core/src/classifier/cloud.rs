//! Cloud metadata tier: probes provider metadata endpoints in a fixed order.

use std::time::Duration;

use tracing::debug;

use super::label::EnvironmentLabel;

/// Per-provider request timeout.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(1);

/// Status and body of a metadata endpoint response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataResponse {
    pub status: u16,
    pub body: String,
}

impl MetadataResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

/// Minimal HTTP GET used by the cloud tier.
///
/// `None` means the request did not produce a response at all (timeout,
/// connection refused, DNS failure).
pub trait MetadataClient: Send + Sync {
    fn get(&self, url: &str, headers: &[(&str, &str)], timeout: Duration) -> Option<MetadataResponse>;
}

/// Blocking `reqwest` client with proxies disabled.
///
/// Link-local metadata addresses must never be routed through an HTTP proxy
/// picked up from the environment.
pub struct HttpMetadataClient {
    client: Option<reqwest::blocking::Client>,
}

impl HttpMetadataClient {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .no_proxy()
            .connect_timeout(METADATA_TIMEOUT)
            .build();
        match client {
            Ok(client) => Self {
                client: Some(client),
            },
            Err(e) => {
                debug!("metadata client unavailable: {}", e);
                Self { client: None }
            }
        }
    }
}

impl Default for HttpMetadataClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataClient for HttpMetadataClient {
    fn get(&self, url: &str, headers: &[(&str, &str)], timeout: Duration) -> Option<MetadataResponse> {
        let client = self.client.as_ref()?;
        let mut request = client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        match request.send() {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().unwrap_or_default();
                Some(MetadataResponse { status, body })
            }
            Err(e) => {
                debug!("metadata {} unreachable: {}", url, e);
                None
            }
        }
    }
}

/// One provider's endpoint.
pub struct Provider {
    pub label: EnvironmentLabel,
    pub url: &'static str,
    pub headers: &'static [(&'static str, &'static str)],
    /// Extra body check on top of HTTP 200.
    pub accepts: fn(&str) -> bool,
}

fn any_body(_: &str) -> bool {
    true
}

/// Huawei serves the generic OpenStack document, shared with every OpenStack
/// cloud; only a body naming Huawei counts.
fn huawei_body(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("availability_zone") && lower.contains("huawei")
}

/// Providers in probe order.
pub fn providers() -> Vec<Provider> {
    use EnvironmentLabel::*;
    vec![
        Provider {
            label: AwsEc2,
            url: "http://169.254.169.254/latest/meta-data/instance-id",
            headers: &[],
            accepts: any_body,
        },
        Provider {
            label: AzureVm,
            url: "http://169.254.169.254/metadata/instance?api-version=2021-02-01",
            headers: &[("Metadata", "true")],
            accepts: any_body,
        },
        Provider {
            label: GcpVm,
            url: "http://metadata.google.internal/computeMetadata/v1/instance/id",
            headers: &[("Metadata-Flavor", "Google")],
            accepts: any_body,
        },
        Provider {
            label: AlibabaEcs,
            url: "http://100.100.100.200/latest/meta-data/instance-id",
            headers: &[],
            accepts: any_body,
        },
        Provider {
            label: TencentCvm,
            url: "http://metadata.tencentcloudapi.com/latest/meta-data/instance-id",
            headers: &[],
            accepts: any_body,
        },
        Provider {
            label: HuaweiEcs,
            url: "http://169.254.169.254/openstack/latest/meta_data.json",
            headers: &[],
            accepts: huawei_body,
        },
        Provider {
            label: OracleCloud,
            url: "http://169.254.169.254/opc/v1/instance/",
            headers: &[("Authorization", "Bearer Oracle")],
            accepts: any_body,
        },
        Provider {
            label: DigitalOcean,
            url: "http://169.254.169.254/metadata/v1/id",
            headers: &[],
            accepts: any_body,
        },
        Provider {
            label: Linode,
            url: "http://169.254.169.254/linode/v1/instance",
            headers: &[],
            accepts: any_body,
        },
        Provider {
            label: Vultr,
            url: "http://169.254.169.254/v1/instanceid",
            headers: &[],
            accepts: any_body,
        },
    ]
}

/// Returns the first provider whose endpoint answers 200 with an accepted body.
pub fn detect(client: &dyn MetadataClient) -> Option<EnvironmentLabel> {
    for provider in providers() {
        match client.get(provider.url, provider.headers, METADATA_TIMEOUT) {
            Some(resp) if resp.status == 200 && (provider.accepts)(&resp.body) => {
                debug!("cloud metadata: {} answered", provider.label);
                return Some(provider.label);
            }
            Some(resp) => debug!("cloud metadata: {} status {}", provider.label, resp.status),
            None => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockMetadata;

    #[test]
    fn test_no_provider_answers() {
        let client = MockMetadata::new();
        assert_eq!(detect(&client), None);
        assert_eq!(client.calls().len(), providers().len());
    }

    #[test]
    fn test_first_provider_wins() {
        let mut client = MockMetadata::new();
        client.add(
            "http://100.100.100.200/latest/meta-data/instance-id",
            MetadataResponse::ok("i-alibaba"),
        );
        client.add("http://169.254.169.254/v1/instanceid", MetadataResponse::ok("vultr"));

        assert_eq!(detect(&client), Some(EnvironmentLabel::AlibabaEcs));
        // AWS, Azure, GCP, then Alibaba.
        assert_eq!(client.calls().len(), 4);
    }

    #[test]
    fn test_non_200_advances() {
        let mut client = MockMetadata::new();
        client.add(
            "http://169.254.169.254/latest/meta-data/instance-id",
            MetadataResponse {
                status: 404,
                body: String::new(),
            },
        );
        client.add("http://169.254.169.254/metadata/v1/id", MetadataResponse::ok("1234"));

        assert_eq!(detect(&client), Some(EnvironmentLabel::DigitalOcean));
    }

    #[test]
    fn test_azure_sends_metadata_header() {
        let mut client = MockMetadata::new();
        client.add(
            "http://169.254.169.254/metadata/instance?api-version=2021-02-01",
            MetadataResponse::ok("{}"),
        );

        assert_eq!(detect(&client), Some(EnvironmentLabel::AzureVm));
        let calls = client.calls();
        assert_eq!(calls[1].1, vec![("Metadata".to_string(), "true".to_string())]);
    }

    #[test]
    fn test_huawei_requires_body_markers() {
        let url = "http://169.254.169.254/openstack/latest/meta_data.json";

        let mut plain_openstack = MockMetadata::new();
        plain_openstack.add(url, MetadataResponse::ok(r#"{"availability_zone": "nova"}"#));
        assert_eq!(detect(&plain_openstack), None);

        let mut huawei = MockMetadata::new();
        huawei.add(
            url,
            MetadataResponse::ok(r#"{"availability_zone": "cn-north-4a", "project_id": "huawei-x"}"#),
        );
        assert_eq!(detect(&huawei), Some(EnvironmentLabel::HuaweiEcs));
    }

    #[test]
    fn test_provider_order() {
        let labels: Vec<String> = providers().iter().map(|p| p.label.to_string()).collect();
        assert_eq!(
            labels,
            vec![
                "AWS EC2",
                "Azure VM",
                "GCP VM",
                "Alibaba Cloud ECS",
                "Tencent Cloud CVM",
                "Huawei Cloud ECS",
                "Oracle Cloud",
                "DigitalOcean",
                "Linode",
                "Vultr",
            ]
        );
    }
}
