// src/api/convert.rs
//
// Conversions between the wire schemas and the internal model. Mechanical
// field copies live next to the manual fixups for fields that no longer
// exist in the peer type; every removed field is either rewritten into its
// modern equivalent or the conversion fails loudly.

use super::defaults::DEFAULT_AUTHORIZATION_MODES;
use super::{internal, v1alpha1, v1beta2};
use crate::types::Warning;

#[derive(Debug)]
pub enum ConversionError {
    /// The document decoded, but cannot be structurally mapped.
    InvalidEtcd(String),
    /// Downgrade to a schema that cannot represent the internal shape.
    UnsupportedDowngrade { target: String, reason: String },
}

impl std::fmt::Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEtcd(msg) => write!(f, "invalid etcd configuration: {}", msg),
            Self::UnsupportedDowngrade { target, reason } => {
                write!(f, "cannot convert to {}: {}", target, reason)
            }
        }
    }
}

impl std::error::Error for ConversionError {}

// ---------------------------------------------------------------------------
// v1alpha1 -> internal

pub fn master_configuration_to_internal(
    src: v1alpha1::MasterConfiguration,
) -> Result<(internal::InitConfiguration, Vec<Warning>), ConversionError> {
    let mut warnings = Vec::new();

    let mut cluster = internal::ClusterConfiguration {
        kubernetes_version: src.kubernetes_version,
        control_plane_endpoint: String::new(),
        networking: internal::Networking {
            service_subnet: src.networking.service_subnet,
            pod_subnet: src.networking.pod_subnet,
            dns_domain: src.networking.dns_domain,
        },
        etcd: convert_v1alpha1_etcd(src.etcd),
        api_server: internal::ApiServer {
            extra_args: src.api_server_extra_args,
            extra_volumes: Vec::new(),
            cert_sans: src.api_server_cert_sans,
        },
        controller_manager: internal::ControlPlaneComponent {
            extra_args: src.controller_manager_extra_args,
            extra_volumes: Vec::new(),
        },
        scheduler: internal::ControlPlaneComponent {
            extra_args: src.scheduler_extra_args,
            extra_volumes: Vec::new(),
        },
        certificates_dir: src.certificates_dir,
        image_repository: src.image_repository,
    };

    upgrade_cloud_provider(&src.cloud_provider, &mut cluster, &mut warnings);
    upgrade_authorization_modes(&src.authorization_modes, &mut cluster, &mut warnings);

    let mut bootstrap_tokens = Vec::new();
    if !src.token.is_empty() {
        bootstrap_tokens.push(internal::BootstrapToken {
            token: src.token,
            ..Default::default()
        });
    }

    Ok((
        internal::InitConfiguration {
            cluster,
            bootstrap_tokens,
            node_registration: internal::NodeRegistration {
                name: src.node_name,
                ..Default::default()
            },
            local_api_endpoint: internal::ApiEndpoint {
                advertise_address: src.api.advertise_address,
                bind_port: src.api.bind_port,
            },
        },
        warnings,
    ))
}

/// The top-level `cloudProvider` field was removed. A set value is rewritten
/// into `cloud-provider` extra args for both the apiserver and the
/// controller manager, matching what the flag used to expand to.
fn upgrade_cloud_provider(
    cloud_provider: &str,
    cluster: &mut internal::ClusterConfiguration,
    warnings: &mut Vec<Warning>,
) {
    if cloud_provider.is_empty() {
        return;
    }
    warnings.push(Warning::new(
        "CloudProvider",
        format!(
            "cloudProvider is removed; setting extra argument cloud-provider={} on the \
             apiserver and controller manager instead",
            cloud_provider
        ),
    ));
    cluster
        .api_server
        .extra_args
        .entry("cloud-provider".to_string())
        .or_insert_with(|| cloud_provider.to_string());
    cluster
        .controller_manager
        .extra_args
        .entry("cloud-provider".to_string())
        .or_insert_with(|| cloud_provider.to_string());
}

/// `authorizationModes` was removed. A list differing from the compiled-in
/// default is serialized into an `authorization-mode` extra arg rather than
/// silently dropped; the default list converts to nothing.
fn upgrade_authorization_modes(
    modes: &[String],
    cluster: &mut internal::ClusterConfiguration,
    warnings: &mut Vec<Warning>,
) {
    if modes.is_empty() || modes == DEFAULT_AUTHORIZATION_MODES {
        return;
    }
    let joined = modes.join(",");
    warnings.push(Warning::new(
        "AuthorizationModes",
        format!(
            "authorizationModes is removed; setting extra argument authorization-mode={} \
             on the apiserver instead",
            joined
        ),
    ));
    cluster
        .api_server
        .extra_args
        .entry("authorization-mode".to_string())
        .or_insert(joined);
}

/// The flat etcd shape carries both flavors in one struct: a nonempty
/// endpoint list means externally managed etcd, anything else is local.
fn convert_v1alpha1_etcd(etcd: v1alpha1::Etcd) -> internal::Etcd {
    if !etcd.endpoints.is_empty() {
        internal::Etcd::External(internal::ExternalEtcd {
            endpoints: etcd.endpoints,
            ca_file: etcd.ca_file,
            cert_file: etcd.cert_file,
            key_file: etcd.key_file,
        })
    } else {
        internal::Etcd::Local(internal::LocalEtcd {
            data_dir: etcd.data_dir,
            extra_args: etcd.extra_args,
            server_cert_sans: etcd.server_cert_sans,
            peer_cert_sans: etcd.peer_cert_sans,
        })
    }
}

/// internal -> v1alpha1 is intentionally unsupported: the Local/External
/// etcd split and per-component volumes have no lossless projection onto
/// the flat legacy shape, so downgrade fails instead of guessing.
pub fn master_configuration_from_internal(
    _src: &internal::InitConfiguration,
) -> Result<v1alpha1::MasterConfiguration, ConversionError> {
    Err(ConversionError::UnsupportedDowngrade {
        target: format!("kubeadm.k8s.io/{}", v1alpha1::VERSION),
        reason: "the etcd and control plane component shapes cannot be losslessly \
                 downgraded; re-create the document at the preferred version"
            .to_string(),
    })
}

// ---------------------------------------------------------------------------
// v1beta2 <-> internal

pub fn cluster_configuration_to_internal(
    src: v1beta2::ClusterConfiguration,
) -> Result<(internal::ClusterConfiguration, Vec<Warning>), ConversionError> {
    let etcd = match (src.etcd.local, src.etcd.external) {
        (Some(_), Some(_)) => {
            return Err(ConversionError::InvalidEtcd(
                "local and external are mutually exclusive".to_string(),
            ))
        }
        (None, Some(external)) => {
            if external.endpoints.is_empty() {
                return Err(ConversionError::InvalidEtcd(
                    "external etcd requires at least one endpoint".to_string(),
                ));
            }
            internal::Etcd::External(internal::ExternalEtcd {
                endpoints: external.endpoints,
                ca_file: external.ca_file,
                cert_file: external.cert_file,
                key_file: external.key_file,
            })
        }
        (Some(local), None) => internal::Etcd::Local(internal::LocalEtcd {
            data_dir: local.data_dir,
            extra_args: local.extra_args,
            server_cert_sans: local.server_cert_sans,
            peer_cert_sans: local.peer_cert_sans,
        }),
        (None, None) => internal::Etcd::Local(internal::LocalEtcd::default()),
    };

    Ok((
        internal::ClusterConfiguration {
            kubernetes_version: src.kubernetes_version,
            control_plane_endpoint: src.control_plane_endpoint,
            networking: internal::Networking {
                service_subnet: src.networking.service_subnet,
                pod_subnet: src.networking.pod_subnet,
                dns_domain: src.networking.dns_domain,
            },
            etcd,
            api_server: internal::ApiServer {
                extra_args: src.api_server.extra_args,
                extra_volumes: convert_mounts_to_internal(src.api_server.extra_volumes),
                cert_sans: src.api_server.cert_sans,
            },
            controller_manager: internal::ControlPlaneComponent {
                extra_args: src.controller_manager.extra_args,
                extra_volumes: convert_mounts_to_internal(src.controller_manager.extra_volumes),
            },
            scheduler: internal::ControlPlaneComponent {
                extra_args: src.scheduler.extra_args,
                extra_volumes: convert_mounts_to_internal(src.scheduler.extra_volumes),
            },
            certificates_dir: src.certificates_dir,
            image_repository: src.image_repository,
        },
        Vec::new(),
    ))
}

pub fn cluster_configuration_from_internal(
    src: &internal::ClusterConfiguration,
) -> v1beta2::ClusterConfiguration {
    let etcd = match &src.etcd {
        internal::Etcd::Local(local) => v1beta2::Etcd {
            local: Some(v1beta2::LocalEtcd {
                data_dir: local.data_dir.clone(),
                extra_args: local.extra_args.clone(),
                server_cert_sans: local.server_cert_sans.clone(),
                peer_cert_sans: local.peer_cert_sans.clone(),
            }),
            external: None,
        },
        internal::Etcd::External(external) => v1beta2::Etcd {
            local: None,
            external: Some(v1beta2::ExternalEtcd {
                endpoints: external.endpoints.clone(),
                ca_file: external.ca_file.clone(),
                cert_file: external.cert_file.clone(),
                key_file: external.key_file.clone(),
            }),
        },
    };

    v1beta2::ClusterConfiguration {
        etcd,
        networking: v1beta2::Networking {
            service_subnet: src.networking.service_subnet.clone(),
            pod_subnet: src.networking.pod_subnet.clone(),
            dns_domain: src.networking.dns_domain.clone(),
        },
        kubernetes_version: src.kubernetes_version.clone(),
        control_plane_endpoint: src.control_plane_endpoint.clone(),
        api_server: v1beta2::ApiServer {
            extra_args: src.api_server.extra_args.clone(),
            extra_volumes: convert_mounts_from_internal(&src.api_server.extra_volumes),
            cert_sans: src.api_server.cert_sans.clone(),
        },
        controller_manager: v1beta2::ControlPlaneComponent {
            extra_args: src.controller_manager.extra_args.clone(),
            extra_volumes: convert_mounts_from_internal(&src.controller_manager.extra_volumes),
        },
        scheduler: v1beta2::ControlPlaneComponent {
            extra_args: src.scheduler.extra_args.clone(),
            extra_volumes: convert_mounts_from_internal(&src.scheduler.extra_volumes),
        },
        certificates_dir: src.certificates_dir.clone(),
        image_repository: src.image_repository.clone(),
    }
}

pub fn init_configuration_to_internal(
    src: v1beta2::InitConfiguration,
) -> internal::InitConfiguration {
    internal::InitConfiguration {
        cluster: internal::ClusterConfiguration::default(),
        bootstrap_tokens: src
            .bootstrap_tokens
            .into_iter()
            .map(|t| internal::BootstrapToken {
                token: t.token,
                description: t.description,
                ttl_hours: t.ttl_hours,
                usages: t.usages,
                groups: t.groups,
            })
            .collect(),
        node_registration: convert_node_registration_to_internal(src.node_registration),
        local_api_endpoint: internal::ApiEndpoint {
            advertise_address: src.local_api_endpoint.advertise_address,
            bind_port: src.local_api_endpoint.bind_port,
        },
    }
}

pub fn init_configuration_from_internal(
    src: &internal::InitConfiguration,
) -> v1beta2::InitConfiguration {
    v1beta2::InitConfiguration {
        bootstrap_tokens: src
            .bootstrap_tokens
            .iter()
            .map(|t| v1beta2::BootstrapToken {
                token: t.token.clone(),
                description: t.description.clone(),
                ttl_hours: t.ttl_hours,
                usages: t.usages.clone(),
                groups: t.groups.clone(),
            })
            .collect(),
        node_registration: convert_node_registration_from_internal(&src.node_registration),
        local_api_endpoint: v1beta2::ApiEndpoint {
            advertise_address: src.local_api_endpoint.advertise_address.clone(),
            bind_port: src.local_api_endpoint.bind_port,
        },
    }
}

pub fn join_configuration_to_internal(
    src: v1beta2::JoinConfiguration,
) -> internal::JoinConfiguration {
    internal::JoinConfiguration {
        node_registration: convert_node_registration_to_internal(src.node_registration),
        discovery: internal::Discovery {
            api_server_endpoint: src.discovery.api_server_endpoint,
            token: src.discovery.token,
            ca_cert_hashes: src.discovery.ca_cert_hashes,
            unsafe_skip_ca_verification: src.discovery.unsafe_skip_ca_verification,
        },
        control_plane: src.control_plane.map(|cp| internal::JoinControlPlane {
            local_api_endpoint: internal::ApiEndpoint {
                advertise_address: cp.local_api_endpoint.advertise_address,
                bind_port: cp.local_api_endpoint.bind_port,
            },
        }),
    }
}

pub fn join_configuration_from_internal(
    src: &internal::JoinConfiguration,
) -> v1beta2::JoinConfiguration {
    v1beta2::JoinConfiguration {
        node_registration: convert_node_registration_from_internal(&src.node_registration),
        discovery: v1beta2::Discovery {
            api_server_endpoint: src.discovery.api_server_endpoint.clone(),
            token: src.discovery.token.clone(),
            ca_cert_hashes: src.discovery.ca_cert_hashes.clone(),
            unsafe_skip_ca_verification: src.discovery.unsafe_skip_ca_verification,
        },
        control_plane: src.control_plane.as_ref().map(|cp| v1beta2::JoinControlPlane {
            local_api_endpoint: v1beta2::ApiEndpoint {
                advertise_address: cp.local_api_endpoint.advertise_address.clone(),
                bind_port: cp.local_api_endpoint.bind_port,
            },
        }),
    }
}

fn convert_node_registration_to_internal(
    src: v1beta2::NodeRegistration,
) -> internal::NodeRegistration {
    internal::NodeRegistration {
        name: src.name,
        cri_socket: src.cri_socket,
        taints: src
            .taints
            .into_iter()
            .map(|t| internal::Taint {
                key: t.key,
                value: t.value,
                effect: t.effect,
            })
            .collect(),
        kubelet_extra_args: src.kubelet_extra_args,
    }
}

fn convert_node_registration_from_internal(
    src: &internal::NodeRegistration,
) -> v1beta2::NodeRegistration {
    v1beta2::NodeRegistration {
        name: src.name.clone(),
        cri_socket: src.cri_socket.clone(),
        taints: src
            .taints
            .iter()
            .map(|t| v1beta2::Taint {
                key: t.key.clone(),
                value: t.value.clone(),
                effect: t.effect.clone(),
            })
            .collect(),
        kubelet_extra_args: src.kubelet_extra_args.clone(),
    }
}

fn convert_mounts_to_internal(src: Vec<v1beta2::HostPathMount>) -> Vec<internal::HostPathMount> {
    src.into_iter()
        .map(|m| internal::HostPathMount {
            name: m.name,
            host_path: m.host_path,
            mount_path: m.mount_path,
            read_only: m.read_only,
        })
        .collect()
}

fn convert_mounts_from_internal(src: &[internal::HostPathMount]) -> Vec<v1beta2::HostPathMount> {
    src.iter()
        .map(|m| v1beta2::HostPathMount {
            name: m.name.clone(),
            host_path: m.host_path.clone(),
            mount_path: m.mount_path.clone(),
            read_only: m.read_only,
        })
        .collect()
}
