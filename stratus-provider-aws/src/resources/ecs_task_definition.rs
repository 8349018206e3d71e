//! ECS Task Definition
//!
//! Each registration creates an immutable revision; the identifier is the
//! revision ARN. Only tags can change in place.

use std::collections::{BTreeMap, HashMap};

use aws_sdk_ecs::error::BuildError;
use aws_sdk_ecs::types::{
    Compatibility, ContainerDefinition, Device, DeviceCgroupPermission, DockerVolumeConfiguration,
    EfsAuthorizationConfig, EfsAuthorizationConfigIam, EfsTransitEncryption,
    EfsVolumeConfiguration, HostEntry, HostVolumeProperties, InferenceAccelerator, IpcMode,
    KernelCapabilities, KeyValuePair, LinuxParameters, LogConfiguration, LogDriver, MountPoint,
    NetworkMode, PidMode, PortMapping, ProxyConfiguration, ProxyConfigurationType,
    ResourceRequirement, ResourceType, Scope, Secret, TaskDefinition, TaskDefinitionField,
    TaskDefinitionPlacementConstraint, TaskDefinitionPlacementConstraintType,
    TaskDefinitionStatus, TransportProtocol, Ulimit, UlimitName, Volume, VolumeFrom,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State, Value};

use crate::errors::{is_aws_err, sdk_error};
use crate::provider::AwsProvider;
use crate::resources::ecs_service::{expand_tags, flatten_tags};
use crate::utils::{
    convert_enum_value, get_bool, get_int, get_list, get_map, get_string, get_string_list,
    get_string_map, require_string, string_list_value, string_map_value, to_i32,
};

const TASK_DEFINITION_ARN_PATTERN: &str =
    r"^arn:[^:]+:ecs:[^:]*:[0-9]*:task-definition/([A-Za-z0-9_-]+):([0-9]+)$";

/// Code ECS uses when a task definition cannot be described
const CLIENT_EXCEPTION: &str = "ClientException";

/// Split a task definition ARN into family and revision
pub fn parse_task_definition(arn: &str) -> ProviderResult<(String, i64)> {
    let invalid = || {
        ProviderError::validation(format!(
            "invalid task definition ARN ({}), expected \
             arn:<partition>:ecs:<region>:<account>:task-definition/<family>:<revision>",
            arn
        ))
    };

    let re = Regex::new(TASK_DEFINITION_ARN_PATTERN)
        .map_err(|e| ProviderError::new(format!("task definition ARN pattern: {}", e)))?;
    let captures = re.captures(arn).ok_or_else(invalid)?;
    let family = captures.get(1).ok_or_else(invalid)?.as_str().to_string();
    let revision = captures
        .get(2)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .ok_or_else(invalid)?;
    Ok((family, revision))
}

// =============================================================================
// Container definitions
// =============================================================================

/// One container of a task definition, in the ECS JSON format
///
/// Keys outside this set are rejected rather than silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerDefinitionJson {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_point: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvironmentVariable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMappingJson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<LogConfigurationJson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_points: Vec<MountPointJson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes_from: Vec<VolumeFromJson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ulimits: Vec<UlimitJson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<HostEntryJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux_parameters: Option<LinuxParametersJson>,
    /// Host devices given next to the other container keys; ECS only knows
    /// them under `linuxParameters`, where decoding moves them
    #[serde(default, skip_serializing)]
    pub devices: Vec<DeviceJson>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub docker_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub docker_security_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_requirements: Vec<ResourceRequirementJson>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortMappingJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecretJson {
    pub name: String,
    pub value_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogConfigurationJson {
    pub log_driver: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MountPointJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VolumeFromJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UlimitJson {
    pub name: String,
    pub soft_limit: i32,
    pub hard_limit: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HostEntryJson {
    pub hostname: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LinuxParametersJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<KernelCapabilitiesJson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_process_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_memory_size: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelCapabilitiesJson {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeviceJson {
    pub host_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceRequirementJson {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl LinuxParametersJson {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn to_sdk(&self) -> Result<LinuxParameters, BuildError> {
        let devices = self
            .devices
            .iter()
            .map(|d| {
                Device::builder()
                    .host_path(&d.host_path)
                    .set_container_path(d.container_path.clone())
                    .set_permissions(non_empty(
                        d.permissions
                            .iter()
                            .map(|p| DeviceCgroupPermission::from(p.as_str()))
                            .collect(),
                    ))
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LinuxParameters::builder()
            .set_capabilities(self.capabilities.as_ref().map(|c| {
                KernelCapabilities::builder()
                    .set_add(non_empty(c.add.clone()))
                    .set_drop(non_empty(c.drop.clone()))
                    .build()
            }))
            .set_devices(non_empty(devices))
            .set_init_process_enabled(self.init_process_enabled)
            .set_shared_memory_size(self.shared_memory_size)
            .build())
    }

    fn from_sdk(params: &LinuxParameters) -> Self {
        Self {
            capabilities: params.capabilities().map(|c| KernelCapabilitiesJson {
                add: c.add().to_vec(),
                drop: c.drop().to_vec(),
            }),
            devices: params
                .devices()
                .iter()
                .map(|d| DeviceJson {
                    host_path: d.host_path().to_string(),
                    container_path: d.container_path().map(String::from),
                    permissions: d.permissions().iter().map(|p| p.as_str().to_string()).collect(),
                })
                .collect(),
            init_process_enabled: params.init_process_enabled(),
            shared_memory_size: params.shared_memory_size(),
        }
    }
}

impl ContainerDefinitionJson {
    /// Move container-level devices to where ECS expects them
    fn hoist_devices(&mut self) {
        if self.devices.is_empty() {
            return;
        }
        let devices = std::mem::take(&mut self.devices);
        self.linux_parameters
            .get_or_insert_with(LinuxParametersJson::default)
            .devices
            .extend(devices);
    }

    /// Drop values ECS fills in by default and order the unordered lists
    fn normalize(&mut self) {
        self.hoist_devices();
        if self.essential == Some(true) {
            self.essential = None;
        }
        if self.cpu == Some(0) {
            self.cpu = None;
        }
        self.environment.sort();
        self.secrets.sort();
        self.resource_requirements.sort();
        for mapping in &mut self.port_mappings {
            if mapping.protocol.as_deref() == Some("tcp") {
                mapping.protocol = None;
            }
            // Bridge networking reports a dynamic host port as 0; awsvpc and
            // host networking report it as the container port
            if mapping.host_port == Some(0)
                || (mapping.host_port.is_some() && mapping.host_port == mapping.container_port)
            {
                mapping.host_port = None;
            }
        }
        for mount in &mut self.mount_points {
            if mount.read_only == Some(false) {
                mount.read_only = None;
            }
        }
        for volume in &mut self.volumes_from {
            if volume.read_only == Some(false) {
                volume.read_only = None;
            }
        }
        if let Some(params) = &mut self.linux_parameters {
            if let Some(capabilities) = &mut params.capabilities {
                capabilities.add.sort();
                capabilities.drop.sort();
            }
            if params.capabilities.as_ref().is_some_and(|c| c.add.is_empty() && c.drop.is_empty()) {
                params.capabilities = None;
            }
            for device in &mut params.devices {
                device.permissions.sort();
            }
            params.devices.sort();
        }
        if self.linux_parameters.as_ref().is_some_and(LinuxParametersJson::is_empty) {
            self.linux_parameters = None;
        }
    }

    fn to_sdk(&self) -> ProviderResult<ContainerDefinition> {
        let invalid = |e: BuildError| {
            ProviderError::validation(format!("container {}: {}", self.name, e))
        };

        let secrets = self
            .secrets
            .iter()
            .map(|s| Secret::builder().name(&s.name).value_from(&s.value_from).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        let log_configuration = self
            .log_configuration
            .as_ref()
            .map(|lc| {
                LogConfiguration::builder()
                    .log_driver(LogDriver::from(lc.log_driver.as_str()))
                    .set_options((!lc.options.is_empty()).then(|| {
                        lc.options.clone().into_iter().collect::<HashMap<_, _>>()
                    }))
                    .build()
            })
            .transpose()
            .map_err(invalid)?;
        let ulimits = self
            .ulimits
            .iter()
            .map(|u| {
                Ulimit::builder()
                    .name(UlimitName::from(u.name.as_str()))
                    .soft_limit(u.soft_limit)
                    .hard_limit(u.hard_limit)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        let extra_hosts = self
            .extra_hosts
            .iter()
            .map(|h| HostEntry::builder().hostname(&h.hostname).ip_address(&h.ip_address).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        let resource_requirements = self
            .resource_requirements
            .iter()
            .map(|r| {
                ResourceRequirement::builder()
                    .r#type(ResourceType::from(r.kind.as_str()))
                    .value(&r.value)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        let linux_parameters = self
            .linux_parameters
            .as_ref()
            .map(LinuxParametersJson::to_sdk)
            .transpose()
            .map_err(invalid)?;

        Ok(ContainerDefinition::builder()
            .name(&self.name)
            .image(&self.image)
            .set_cpu(self.cpu)
            .set_memory(self.memory)
            .set_memory_reservation(self.memory_reservation)
            .set_essential(self.essential)
            .set_command(non_empty(self.command.clone()))
            .set_entry_point(non_empty(self.entry_point.clone()))
            .set_environment(non_empty(
                self.environment
                    .iter()
                    .map(|e| KeyValuePair::builder().name(&e.name).value(&e.value).build())
                    .collect(),
            ))
            .set_port_mappings(non_empty(
                self.port_mappings
                    .iter()
                    .map(|pm| {
                        PortMapping::builder()
                            .set_container_port(pm.container_port)
                            .set_host_port(pm.host_port)
                            .set_protocol(pm.protocol.as_deref().map(TransportProtocol::from))
                            .build()
                    })
                    .collect(),
            ))
            .set_links(non_empty(self.links.clone()))
            .set_working_directory(self.working_directory.clone())
            .set_secrets(non_empty(secrets))
            .set_log_configuration(log_configuration)
            .set_mount_points(non_empty(
                self.mount_points
                    .iter()
                    .map(|m| {
                        MountPoint::builder()
                            .set_source_volume(m.source_volume.clone())
                            .set_container_path(m.container_path.clone())
                            .set_read_only(m.read_only)
                            .build()
                    })
                    .collect(),
            ))
            .set_volumes_from(non_empty(
                self.volumes_from
                    .iter()
                    .map(|v| {
                        VolumeFrom::builder()
                            .set_source_container(v.source_container.clone())
                            .set_read_only(v.read_only)
                            .build()
                    })
                    .collect(),
            ))
            .set_ulimits(non_empty(ulimits))
            .set_extra_hosts(non_empty(extra_hosts))
            .set_linux_parameters(linux_parameters)
            .set_docker_labels((!self.docker_labels.is_empty()).then(|| {
                self.docker_labels.clone().into_iter().collect::<HashMap<_, _>>()
            }))
            .set_docker_security_options(non_empty(self.docker_security_options.clone()))
            .set_resource_requirements(non_empty(resource_requirements))
            .build())
    }

    fn from_sdk(def: &ContainerDefinition) -> Self {
        Self {
            name: def.name().unwrap_or_default().to_string(),
            image: def.image().unwrap_or_default().to_string(),
            cpu: Some(def.cpu()),
            memory: def.memory(),
            memory_reservation: def.memory_reservation(),
            essential: def.essential(),
            command: def.command().to_vec(),
            entry_point: def.entry_point().to_vec(),
            environment: def
                .environment()
                .iter()
                .map(|e| EnvironmentVariable {
                    name: e.name().unwrap_or_default().to_string(),
                    value: e.value().unwrap_or_default().to_string(),
                })
                .collect(),
            port_mappings: def
                .port_mappings()
                .iter()
                .map(|pm| PortMappingJson {
                    container_port: pm.container_port(),
                    host_port: pm.host_port(),
                    protocol: pm.protocol().map(|p| p.as_str().to_string()),
                })
                .collect(),
            links: def.links().to_vec(),
            working_directory: def.working_directory().map(String::from),
            secrets: def
                .secrets()
                .iter()
                .map(|s| SecretJson {
                    name: s.name().to_string(),
                    value_from: s.value_from().to_string(),
                })
                .collect(),
            log_configuration: def.log_configuration().map(|lc| LogConfigurationJson {
                log_driver: lc.log_driver().as_str().to_string(),
                options: lc
                    .options()
                    .map(|o| o.clone().into_iter().collect())
                    .unwrap_or_default(),
            }),
            mount_points: def
                .mount_points()
                .iter()
                .map(|m| MountPointJson {
                    source_volume: m.source_volume().map(String::from),
                    container_path: m.container_path().map(String::from),
                    read_only: m.read_only(),
                })
                .collect(),
            volumes_from: def
                .volumes_from()
                .iter()
                .map(|v| VolumeFromJson {
                    source_container: v.source_container().map(String::from),
                    read_only: v.read_only(),
                })
                .collect(),
            ulimits: def
                .ulimits()
                .iter()
                .map(|u| UlimitJson {
                    name: u.name().as_str().to_string(),
                    soft_limit: u.soft_limit(),
                    hard_limit: u.hard_limit(),
                })
                .collect(),
            extra_hosts: def
                .extra_hosts()
                .iter()
                .map(|h| HostEntryJson {
                    hostname: h.hostname().to_string(),
                    ip_address: h.ip_address().to_string(),
                })
                .collect(),
            linux_parameters: def.linux_parameters().map(LinuxParametersJson::from_sdk),
            devices: Vec::new(),
            docker_labels: def
                .docker_labels()
                .map(|labels| labels.clone().into_iter().collect())
                .unwrap_or_default(),
            docker_security_options: def.docker_security_options().to_vec(),
            resource_requirements: def
                .resource_requirements()
                .iter()
                .map(|r| ResourceRequirementJson {
                    kind: r.r#type().as_str().to_string(),
                    value: r.value().to_string(),
                })
                .collect(),
        }
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

/// Parse and validate a `container_definitions` JSON document, keeping the
/// values as written
pub fn decode_container_definitions(raw: &str) -> ProviderResult<Vec<ContainerDefinitionJson>> {
    let mut definitions: Vec<ContainerDefinitionJson> = serde_json::from_str(raw)
        .map_err(|e| ProviderError::validation(format!("container_definitions is invalid: {}", e)))?;

    if definitions.is_empty() {
        return Err(ProviderError::validation(
            "container_definitions is invalid: at least one container is required",
        ));
    }
    for (i, def) in definitions.iter().enumerate() {
        if def.name.is_empty() || def.image.is_empty() {
            return Err(ProviderError::validation(format!(
                "container_definitions is invalid: container at index ({}) needs a name and an image",
                i
            )));
        }
    }

    for def in &mut definitions {
        def.hoist_devices();
    }
    Ok(definitions)
}

/// Parse, validate and normalize a `container_definitions` JSON document
pub fn parse_container_definitions(raw: &str) -> ProviderResult<Vec<ContainerDefinitionJson>> {
    let mut definitions = decode_container_definitions(raw)?;
    for def in &mut definitions {
        def.normalize();
    }
    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(definitions)
}

fn serialize_container_definitions(definitions: &[ContainerDefinitionJson]) -> ProviderResult<String> {
    serde_json::to_string(definitions).map_err(|e| {
        ProviderError::new(format!("encoding container_definitions: {}", e)).with_cause(e)
    })
}

/// Canonical JSON for a `container_definitions` document
///
/// Key order, container order and values ECS defaults do not affect the
/// result.
pub fn normalize_container_definitions(raw: &str) -> ProviderResult<String> {
    serialize_container_definitions(&parse_container_definitions(raw)?)
}

/// Canonical JSON for container definitions as ECS reports them
pub fn flatten_container_definitions(definitions: &[ContainerDefinition]) -> ProviderResult<String> {
    let mut definitions: Vec<ContainerDefinitionJson> =
        definitions.iter().map(ContainerDefinitionJson::from_sdk).collect();
    for def in &mut definitions {
        def.normalize();
    }
    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    serialize_container_definitions(&definitions)
}

// =============================================================================
// Task-level settings
// =============================================================================

fn object_items<'a>(attribute: &str, items: &'a [Value]) -> ProviderResult<Vec<&'a HashMap<String, Value>>> {
    items
        .iter()
        .map(|item| match item {
            Value::Map(map) => Ok(map),
            _ => Err(ProviderError::validation(format!("{}: expected an object", attribute))),
        })
        .collect()
}

fn required<T>(attribute: &str, key: &str, value: Option<T>) -> ProviderResult<T> {
    value.ok_or_else(|| ProviderError::validation(format!("{}: {} is required", attribute, key)))
}

fn build_failed(attribute: &str) -> impl Fn(BuildError) -> ProviderError + '_ {
    move |e| ProviderError::validation(format!("{}: {}", attribute, e))
}

fn non_empty_map(map: HashMap<String, String>) -> Option<HashMap<String, String>> {
    (!map.is_empty()).then_some(map)
}

fn docker_volume_is_shared(config: &HashMap<String, Value>) -> bool {
    get_string(config, "scope").is_some_and(|scope| convert_enum_value(&scope) == "shared")
}

pub fn expand_volumes(attributes: &HashMap<String, Value>) -> ProviderResult<Vec<Volume>> {
    object_items("volume", get_list(attributes, "volume"))?
        .into_iter()
        .map(|volume| {
            let name = required("volume", "name", get_string(volume, "name"))?;
            let host = get_string(volume, "host_path")
                .map(|path| HostVolumeProperties::builder().source_path(path).build());

            // Autoprovisioning only applies to shared volumes
            let docker = get_map(volume, "docker_volume_configuration").map(|config| {
                DockerVolumeConfiguration::builder()
                    .scope(Scope::from(
                        convert_enum_value(&get_string(config, "scope").unwrap_or_else(|| "task".to_string()))
                            .as_str(),
                    ))
                    .set_autoprovision(
                        get_bool(config, "autoprovision").filter(|_| docker_volume_is_shared(config)),
                    )
                    .set_driver(get_string(config, "driver"))
                    .set_driver_opts(non_empty_map(get_string_map(config, "driver_opts")))
                    .set_labels(non_empty_map(get_string_map(config, "labels")))
                    .build()
            });

            let efs = get_map(volume, "efs_volume_configuration")
                .map(|config| {
                    let port = get_int(config, "transit_encryption_port")
                        .map(|p| to_i32("transit_encryption_port", p))
                        .transpose()?;
                    let authorization = get_map(config, "authorization_config").map(|auth| {
                        EfsAuthorizationConfig::builder()
                            .set_access_point_id(get_string(auth, "access_point_id"))
                            .set_iam(get_string(auth, "iam").map(|iam| {
                                EfsAuthorizationConfigIam::from(convert_enum_value(&iam).as_str())
                            }))
                            .build()
                    });
                    EfsVolumeConfiguration::builder()
                        .set_file_system_id(get_string(config, "file_system_id"))
                        .set_root_directory(get_string(config, "root_directory"))
                        .set_transit_encryption(get_string(config, "transit_encryption").map(|t| {
                            EfsTransitEncryption::from(convert_enum_value(&t).as_str())
                        }))
                        .set_transit_encryption_port(port)
                        .set_authorization_config(authorization)
                        .build()
                        .map_err(build_failed("efs_volume_configuration"))
                })
                .transpose()?;

            Ok(Volume::builder()
                .name(name)
                .set_host(host)
                .set_docker_volume_configuration(docker)
                .set_efs_volume_configuration(efs)
                .build())
        })
        .collect()
}

fn flatten_volume(volume: &Volume) -> Value {
    let mut map = HashMap::new();
    if let Some(name) = volume.name() {
        map.insert("name".to_string(), Value::from(name));
    }
    if let Some(path) = volume.host().and_then(|h| h.source_path()) {
        map.insert("host_path".to_string(), Value::from(path));
    }
    if let Some(docker) = volume.docker_volume_configuration() {
        let mut config = HashMap::new();
        if let Some(scope) = docker.scope() {
            config.insert("scope".to_string(), Value::from(scope.as_str()));
        }
        if let Some(autoprovision) = docker.autoprovision() {
            config.insert("autoprovision".to_string(), Value::Bool(autoprovision));
        }
        if let Some(driver) = docker.driver() {
            config.insert("driver".to_string(), Value::from(driver));
        }
        if let Some(opts) = docker.driver_opts().filter(|o| !o.is_empty()) {
            config.insert("driver_opts".to_string(), string_map_value(opts.clone()));
        }
        if let Some(labels) = docker.labels().filter(|l| !l.is_empty()) {
            config.insert("labels".to_string(), string_map_value(labels.clone()));
        }
        map.insert("docker_volume_configuration".to_string(), Value::Map(config));
    }
    if let Some(efs) = volume.efs_volume_configuration() {
        let mut config = HashMap::from([(
            "file_system_id".to_string(),
            Value::from(efs.file_system_id()),
        )]);
        if let Some(root) = efs.root_directory() {
            config.insert("root_directory".to_string(), Value::from(root));
        }
        if let Some(encryption) = efs.transit_encryption() {
            config.insert("transit_encryption".to_string(), Value::from(encryption.as_str()));
        }
        if let Some(port) = efs.transit_encryption_port() {
            config.insert("transit_encryption_port".to_string(), Value::Int(i64::from(port)));
        }
        if let Some(auth) = efs.authorization_config() {
            let mut authorization = HashMap::new();
            if let Some(access_point) = auth.access_point_id() {
                authorization.insert("access_point_id".to_string(), Value::from(access_point));
            }
            if let Some(iam) = auth.iam() {
                authorization.insert("iam".to_string(), Value::from(iam.as_str()));
            }
            config.insert("authorization_config".to_string(), Value::Map(authorization));
        }
        map.insert("efs_volume_configuration".to_string(), Value::Map(config));
    }
    Value::Map(map)
}

/// Volumes ordered by name
pub fn flatten_volumes(volumes: &[Volume]) -> Value {
    let mut volumes: Vec<&Volume> = volumes.iter().collect();
    volumes.sort_by(|a, b| a.name().cmp(&b.name()));
    Value::List(volumes.into_iter().map(flatten_volume).collect())
}

pub fn expand_task_placement_constraints(
    attributes: &HashMap<String, Value>,
) -> ProviderResult<Vec<TaskDefinitionPlacementConstraint>> {
    let items = get_list(attributes, "placement_constraints");
    if items.len() > 10 {
        return Err(ProviderError::validation(
            "placement_constraints: at most 10 constraints are allowed",
        ));
    }
    object_items("placement_constraints", items).map(|constraints| {
        constraints
            .into_iter()
            .map(|c| {
                TaskDefinitionPlacementConstraint::builder()
                    .set_type(get_string(c, "type").map(|t| {
                        TaskDefinitionPlacementConstraintType::from(convert_enum_value(&t).as_str())
                    }))
                    .set_expression(get_string(c, "expression").filter(|e| !e.is_empty()))
                    .build()
            })
            .collect()
    })
}

/// Constraints ordered by type, then expression
pub fn flatten_task_placement_constraints(constraints: &[TaskDefinitionPlacementConstraint]) -> Value {
    let mut pairs: Vec<(&str, Option<&str>)> = constraints
        .iter()
        .map(|c| (c.r#type().map(|t| t.as_str()).unwrap_or_default(), c.expression()))
        .collect();
    pairs.sort();
    Value::List(
        pairs
            .into_iter()
            .map(|(kind, expression)| {
                let mut map = HashMap::from([("type".to_string(), Value::from(kind))]);
                if let Some(expression) = expression.filter(|e| !e.is_empty()) {
                    map.insert("expression".to_string(), Value::from(expression));
                }
                Value::Map(map)
            })
            .collect(),
    )
}

pub fn expand_proxy_configuration(
    attributes: &HashMap<String, Value>,
) -> ProviderResult<Option<ProxyConfiguration>> {
    let Some(proxy) = get_map(attributes, "proxy_configuration") else {
        return Ok(None);
    };
    let mut properties: Vec<(String, String)> = get_string_map(proxy, "properties").into_iter().collect();
    properties.sort();
    ProxyConfiguration::builder()
        .set_container_name(get_string(proxy, "container_name"))
        .r#type(ProxyConfigurationType::from(
            convert_enum_value(&get_string(proxy, "type").unwrap_or_else(|| "APPMESH".to_string()))
                .as_str(),
        ))
        .set_properties(non_empty(
            properties
                .into_iter()
                .map(|(name, value)| KeyValuePair::builder().name(name).value(value).build())
                .collect(),
        ))
        .build()
        .map(Some)
        .map_err(build_failed("proxy_configuration"))
}

pub fn flatten_proxy_configuration(proxy: &ProxyConfiguration) -> Value {
    let mut map = HashMap::from([(
        "container_name".to_string(),
        Value::from(proxy.container_name()),
    )]);
    if let Some(kind) = proxy.r#type() {
        map.insert("type".to_string(), Value::from(kind.as_str()));
    }
    let properties: HashMap<String, String> = proxy
        .properties()
        .iter()
        .filter_map(|p| Some((p.name()?.to_string(), p.value().unwrap_or_default().to_string())))
        .collect();
    if !properties.is_empty() {
        map.insert("properties".to_string(), string_map_value(properties));
    }
    Value::Map(map)
}

pub fn expand_inference_accelerators(
    attributes: &HashMap<String, Value>,
) -> ProviderResult<Vec<InferenceAccelerator>> {
    object_items("inference_accelerator", get_list(attributes, "inference_accelerator"))?
        .into_iter()
        .map(|accelerator| {
            InferenceAccelerator::builder()
                .set_device_name(get_string(accelerator, "device_name"))
                .set_device_type(get_string(accelerator, "device_type"))
                .build()
                .map_err(build_failed("inference_accelerator"))
        })
        .collect()
}

/// Accelerators ordered by device name
pub fn flatten_inference_accelerators(accelerators: &[InferenceAccelerator]) -> Value {
    let mut pairs: Vec<(&str, &str)> = accelerators
        .iter()
        .map(|a| (a.device_name(), a.device_type()))
        .collect();
    pairs.sort();
    Value::List(
        pairs
            .into_iter()
            .map(|(name, kind)| {
                Value::Map(HashMap::from([
                    ("device_name".to_string(), Value::from(name)),
                    ("device_type".to_string(), Value::from(kind)),
                ]))
            })
            .collect(),
    )
}

/// Bring configured attributes into the form reads produce
pub fn normalize_task_definition_attributes(
    attributes: &mut HashMap<String, Value>,
) -> ProviderResult<()> {
    if let Some(Value::String(raw)) = attributes.get("container_definitions") {
        let normalized = normalize_container_definitions(raw)?;
        attributes.insert("container_definitions".to_string(), Value::String(normalized));
    }
    if let Some(mode) = get_string(attributes, "network_mode") {
        attributes.insert("network_mode".to_string(), Value::String(convert_enum_value(&mode)));
    }
    if attributes.contains_key("requires_compatibilities") {
        let mut compatibilities: Vec<String> = get_string_list(attributes, "requires_compatibilities")
            .iter()
            .map(|c| convert_enum_value(c))
            .collect();
        compatibilities.sort();
        attributes.insert(
            "requires_compatibilities".to_string(),
            string_list_value(compatibilities),
        );
    }
    for key in ["ipc_mode", "pid_mode"] {
        if let Some(mode) = get_string(attributes, key) {
            attributes.insert(key.to_string(), Value::String(convert_enum_value(&mode)));
        }
    }
    // Round trip the nested settings through the SDK shapes so enum
    // references, defaults and ordering match what reads report
    if attributes.contains_key("volume") {
        let volumes = expand_volumes(attributes)?;
        attributes.insert("volume".to_string(), flatten_volumes(&volumes));
    }
    if attributes.contains_key("placement_constraints") {
        let constraints = expand_task_placement_constraints(attributes)?;
        attributes.insert(
            "placement_constraints".to_string(),
            flatten_task_placement_constraints(&constraints),
        );
    }
    if let Some(proxy) = expand_proxy_configuration(attributes)? {
        attributes.insert(
            "proxy_configuration".to_string(),
            flatten_proxy_configuration(&proxy),
        );
    }
    if attributes.contains_key("inference_accelerator") {
        let accelerators = expand_inference_accelerators(attributes)?;
        attributes.insert(
            "inference_accelerator".to_string(),
            flatten_inference_accelerators(&accelerators),
        );
    }
    Ok(())
}

/// Map a described task definition onto resource attributes
pub fn flatten_task_definition(
    task_definition: &TaskDefinition,
    tags: &[aws_sdk_ecs::types::Tag],
) -> ProviderResult<HashMap<String, Value>> {
    let mut attributes = HashMap::new();

    if let Some(arn) = task_definition.task_definition_arn() {
        attributes.insert("arn".to_string(), Value::from(arn));
    }
    if let Some(family) = task_definition.family() {
        attributes.insert("family".to_string(), Value::from(family));
    }
    attributes.insert(
        "revision".to_string(),
        Value::Int(i64::from(task_definition.revision())),
    );
    attributes.insert(
        "container_definitions".to_string(),
        Value::String(flatten_container_definitions(
            task_definition.container_definitions(),
        )?),
    );
    if let Some(role) = task_definition.task_role_arn() {
        attributes.insert("task_role_arn".to_string(), Value::from(role));
    }
    if let Some(role) = task_definition.execution_role_arn() {
        attributes.insert("execution_role_arn".to_string(), Value::from(role));
    }
    if let Some(mode) = task_definition.network_mode() {
        attributes.insert("network_mode".to_string(), Value::from(mode.as_str()));
    }
    if let Some(cpu) = task_definition.cpu() {
        attributes.insert("cpu".to_string(), Value::from(cpu));
    }
    if let Some(memory) = task_definition.memory() {
        attributes.insert("memory".to_string(), Value::from(memory));
    }
    if !task_definition.requires_compatibilities().is_empty() {
        let mut compatibilities: Vec<&str> = task_definition
            .requires_compatibilities()
            .iter()
            .map(|c| c.as_str())
            .collect();
        compatibilities.sort_unstable();
        attributes.insert(
            "requires_compatibilities".to_string(),
            string_list_value(compatibilities),
        );
    }
    if !task_definition.volumes().is_empty() {
        attributes.insert("volume".to_string(), flatten_volumes(task_definition.volumes()));
    }
    if !task_definition.placement_constraints().is_empty() {
        attributes.insert(
            "placement_constraints".to_string(),
            flatten_task_placement_constraints(task_definition.placement_constraints()),
        );
    }
    if let Some(mode) = task_definition.ipc_mode() {
        attributes.insert("ipc_mode".to_string(), Value::from(mode.as_str()));
    }
    if let Some(mode) = task_definition.pid_mode() {
        attributes.insert("pid_mode".to_string(), Value::from(mode.as_str()));
    }
    if let Some(proxy) = task_definition.proxy_configuration() {
        attributes.insert(
            "proxy_configuration".to_string(),
            flatten_proxy_configuration(proxy),
        );
    }
    if !task_definition.inference_accelerators().is_empty() {
        attributes.insert(
            "inference_accelerator".to_string(),
            flatten_inference_accelerators(task_definition.inference_accelerators()),
        );
    }
    let tags = flatten_tags(tags);
    if !tags.is_empty() {
        attributes.insert("tags".to_string(), string_map_value(tags));
    }

    Ok(attributes)
}

impl AwsProvider {
    /// Register a new task definition revision
    pub(crate) async fn create_ecs_task_definition(&self, resource: Resource) -> ProviderResult<State> {
        let id = resource.id.clone();
        let attrs = &resource.attributes;
        let for_resource = |e: ProviderError| e.for_resource(id.clone());

        let family = require_string(&resource, "family")?;
        let raw = require_string(&resource, "container_definitions")?;
        // Sent as written: normalizing would drop host ports that matter in
        // bridge mode
        let containers = decode_container_definitions(&raw)
            .and_then(|defs| defs.iter().map(|d| d.to_sdk()).collect::<ProviderResult<Vec<_>>>())
            .map_err(for_resource)?;
        let volumes = expand_volumes(attrs).map_err(for_resource)?;
        let placement_constraints = expand_task_placement_constraints(attrs).map_err(for_resource)?;
        let proxy = expand_proxy_configuration(attrs).map_err(for_resource)?;
        let accelerators = expand_inference_accelerators(attrs).map_err(for_resource)?;

        let compatibilities: Vec<Compatibility> = get_string_list(attrs, "requires_compatibilities")
            .iter()
            .map(|c| Compatibility::from(convert_enum_value(c).as_str()))
            .collect();
        let tags = expand_tags(get_string_map(attrs, "tags"));

        log::debug!("Registering ECS Task Definition ({})", family);
        let output = self
            .clients
            .ecs
            .register_task_definition()
            .family(&family)
            .set_container_definitions(Some(containers))
            .set_task_role_arn(get_string(attrs, "task_role_arn"))
            .set_execution_role_arn(get_string(attrs, "execution_role_arn"))
            .set_network_mode(
                get_string(attrs, "network_mode")
                    .map(|m| NetworkMode::from(convert_enum_value(&m).as_str())),
            )
            .set_cpu(get_string(attrs, "cpu"))
            .set_memory(get_string(attrs, "memory"))
            .set_requires_compatibilities(non_empty(compatibilities))
            .set_volumes(non_empty(volumes))
            .set_placement_constraints(non_empty(placement_constraints))
            .set_ipc_mode(get_string(attrs, "ipc_mode").map(|m| IpcMode::from(convert_enum_value(&m).as_str())))
            .set_pid_mode(get_string(attrs, "pid_mode").map(|m| PidMode::from(convert_enum_value(&m).as_str())))
            .set_proxy_configuration(proxy)
            .set_inference_accelerators(non_empty(accelerators))
            .set_tags(non_empty(tags))
            .send()
            .await
            .map_err(|e| sdk_error(format!("creating ECS Task Definition ({})", family), e))
            .map_err(for_resource)?;

        let task_definition = output
            .task_definition()
            .ok_or_else(|| {
                ProviderError::new(format!(
                    "creating ECS Task Definition ({}): empty response",
                    family
                ))
            })
            .map_err(for_resource)?;
        let arn = task_definition.task_definition_arn().unwrap_or_default().to_string();
        let attributes = flatten_task_definition(task_definition, output.tags()).map_err(|e| {
            let partial = State::existing(id.clone(), attrs.clone()).with_identifier(arn.as_str());
            for_resource(e).with_partial_state(partial)
        })?;

        Ok(State::existing(id, attributes).with_identifier(arn))
    }

    /// Read a task definition revision; inactive revisions read as not found
    pub(crate) async fn read_ecs_task_definition(
        &self,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let for_resource = |e: ProviderError| e.for_resource(id.clone());
        parse_task_definition(identifier).map_err(for_resource)?;

        let output = match self
            .clients
            .ecs
            .describe_task_definition()
            .task_definition(identifier)
            .include(TaskDefinitionField::Tags)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if is_aws_err(&e, CLIENT_EXCEPTION, "Unable to describe task definition") => {
                log::warn!("ECS Task Definition ({}) not found, removing from state", identifier);
                return Ok(State::not_found(id.clone()));
            }
            Err(e) => {
                return Err(for_resource(sdk_error(
                    format!("reading ECS Task Definition ({})", identifier),
                    e,
                )));
            }
        };

        let Some(task_definition) = output.task_definition() else {
            return Ok(State::not_found(id.clone()));
        };
        if task_definition.status() == Some(&TaskDefinitionStatus::Inactive) {
            log::debug!(
                "Removing ECS Task Definition ({}) because it's INACTIVE",
                identifier
            );
            return Ok(State::not_found(id.clone()));
        }

        let attributes = flatten_task_definition(task_definition, output.tags()).map_err(for_resource)?;
        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    /// Tags are the only attribute that changes without a new revision
    pub(crate) async fn update_ecs_task_definition(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: Resource,
    ) -> ProviderResult<State> {
        if from.attributes.get("tags") != to.attributes.get("tags") {
            self.update_ecs_tags(identifier, &from.attributes, &to.attributes)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }
        self.read_ecs_task_definition(id, identifier).await
    }

    /// Deregister a task definition revision
    pub(crate) async fn delete_ecs_task_definition(
        &self,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<()> {
        log::debug!("Deregistering ECS Task Definition ({})", identifier);
        match self
            .clients
            .ecs
            .deregister_task_definition()
            .task_definition(identifier)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_aws_err(&e, CLIENT_EXCEPTION, "Unable to describe task definition") => Ok(()),
            Err(e) => Err(sdk_error(format!("deleting ECS Task Definition ({})", identifier), e)
                .for_resource(id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB: &str = r#"[
        {
            "name": "web",
            "image": "nginx:1.27",
            "essential": true,
            "cpu": 0,
            "memory": 512,
            "portMappings": [{"containerPort": 80, "hostPort": 80, "protocol": "tcp"}],
            "environment": [
                {"name": "B", "value": "2"},
                {"name": "A", "value": "1"}
            ]
        },
        {
            "image": "fluent/fluent-bit",
            "name": "log-router",
            "logConfiguration": {"logDriver": "awslogs", "options": {"awslogs-group": "web"}}
        }
    ]"#;

    #[test]
    fn parse_task_definition_arn() {
        let (family, revision) =
            parse_task_definition("arn:aws:ecs:us-east-1:123456789012:task-definition/web_app-1:42")
                .unwrap();
        assert_eq!(family, "web_app-1");
        assert_eq!(revision, 42);
    }

    #[test]
    fn parse_task_definition_rejects_malformed() {
        for arn in [
            "web:1",
            "arn:aws:ecs:us-east-1:123456789012:task-definition/web",
            "arn:aws:ecs:us-east-1:123456789012:task-definition/web:latest",
            "arn:aws:ecs:us-east-1:123456789012:service/web:1",
            "arn:aws:iam::123456789012:task-definition/web:1",
        ] {
            let err = parse_task_definition(arn).unwrap_err();
            assert!(err.message.contains("invalid task definition ARN"), "{}", arn);
        }
    }

    #[test]
    fn normalization_is_order_insensitive() {
        let reordered = r#"[
            {"name": "log-router", "image": "fluent/fluent-bit",
             "logConfiguration": {"options": {"awslogs-group": "web"}, "logDriver": "awslogs"}},
            {"memory": 512, "image": "nginx:1.27", "name": "web",
             "environment": [{"value": "1", "name": "A"}, {"name": "B", "value": "2"}],
             "portMappings": [{"containerPort": 80}]}
        ]"#;

        assert_eq!(
            normalize_container_definitions(WEB).unwrap(),
            normalize_container_definitions(reordered).unwrap()
        );
    }

    #[test]
    fn normalization_drops_defaults() {
        let normalized = normalize_container_definitions(WEB).unwrap();
        assert!(!normalized.contains("essential"));
        assert!(!normalized.contains("\"cpu\""));
        assert!(!normalized.contains("hostPort"));
        assert!(!normalized.contains("tcp"));
        assert!(normalized.starts_with(r#"[{"name":"log-router""#));
    }

    #[test]
    fn dynamic_host_port_reads_back_as_configured() {
        let configured = r#"[{"name":"web","image":"nginx","memory":128,"portMappings":[{"containerPort":80}]}]"#;
        let described = r#"[{"name":"web","image":"nginx","memory":128,"portMappings":[{"containerPort":80,"hostPort":0,"protocol":"tcp"}]}]"#;
        assert_eq!(
            normalize_container_definitions(configured).unwrap(),
            normalize_container_definitions(described).unwrap()
        );
    }

    #[test]
    fn registration_keeps_configured_host_ports() {
        let decoded = decode_container_definitions(WEB).unwrap();
        let web = decoded.iter().find(|d| d.name == "web").unwrap();
        assert_eq!(web.port_mappings[0].host_port, Some(80));
        assert_eq!(web.to_sdk().unwrap().port_mappings()[0].host_port(), Some(80));
    }

    #[test]
    fn invalid_container_definitions() {
        for raw in [
            "[]",
            "{}",
            r#"[{"name": "web"}]"#,
            r#"[{"name": "", "image": "nginx"}]"#,
            r#"[{"name": "web", "image": "nginx", "unknownKey": 1}]"#,
        ] {
            let err = parse_container_definitions(raw).unwrap_err();
            assert!(err.message.contains("container_definitions is invalid"), "{}", raw);
        }
    }

    #[test]
    fn sdk_read_back_matches_configuration() {
        let configured = parse_container_definitions(WEB).unwrap();
        let sdk: Vec<ContainerDefinition> = configured.iter().map(|d| d.to_sdk().unwrap()).collect();
        assert_eq!(sdk[1].log_configuration().unwrap().log_driver(), &LogDriver::Awslogs);

        assert_eq!(
            flatten_container_definitions(&sdk).unwrap(),
            normalize_container_definitions(WEB).unwrap()
        );
    }

    #[test]
    fn configured_attributes_normalized_like_reads() {
        let mut attributes = HashMap::from([
            ("container_definitions".to_string(), Value::from(WEB)),
            ("network_mode".to_string(), Value::from("aws.ecs.NetworkMode.awsvpc")),
            (
                "requires_compatibilities".to_string(),
                string_list_value(["FARGATE", "EC2"]),
            ),
        ]);
        normalize_task_definition_attributes(&mut attributes).unwrap();

        assert_eq!(attributes.get("network_mode"), Some(&Value::from("awsvpc")));
        assert_eq!(
            attributes.get("requires_compatibilities"),
            Some(&string_list_value(["EC2", "FARGATE"]))
        );
        assert_eq!(
            attributes.get("container_definitions"),
            Some(&Value::String(normalize_container_definitions(WEB).unwrap()))
        );
    }

    #[test]
    fn flatten_described_task_definition() {
        let containers: Vec<ContainerDefinition> = parse_container_definitions(WEB)
            .unwrap()
            .iter()
            .map(|d| d.to_sdk().unwrap())
            .collect();
        let task_definition = TaskDefinition::builder()
            .task_definition_arn("arn:aws:ecs:us-east-1:123456789012:task-definition/web:3")
            .family("web")
            .revision(3)
            .set_container_definitions(Some(containers))
            .network_mode(NetworkMode::Awsvpc)
            .cpu("256")
            .requires_compatibilities(Compatibility::Fargate)
            .status(TaskDefinitionStatus::Active)
            .build();
        let tags = vec![aws_sdk_ecs::types::Tag::builder().key("env").value("prod").build()];

        let attrs = flatten_task_definition(&task_definition, &tags).unwrap();
        assert_eq!(attrs.get("family"), Some(&Value::from("web")));
        assert_eq!(attrs.get("revision"), Some(&Value::Int(3)));
        assert_eq!(attrs.get("network_mode"), Some(&Value::from("awsvpc")));
        assert_eq!(attrs.get("cpu"), Some(&Value::from("256")));
        assert!(!attrs.contains_key("memory"));
        assert_eq!(
            attrs.get("requires_compatibilities"),
            Some(&string_list_value(["FARGATE"]))
        );
        assert_eq!(attrs.get("tags"), Some(&string_map_value([("env", "prod")])));
    }

    const SIDECAR: &str = r#"[
        {
            "name": "app",
            "image": "app:2",
            "memory": 256,
            "extraHosts": [{"hostname": "db", "ipAddress": "10.0.0.5"}],
            "mountPoints": [
                {"sourceVolume": "data", "containerPath": "/data", "readOnly": false},
                {"sourceVolume": "conf", "containerPath": "/etc/app", "readOnly": true}
            ],
            "volumesFrom": [{"sourceContainer": "init", "readOnly": false}],
            "ulimits": [{"name": "nofile", "softLimit": 1024, "hardLimit": 4096}],
            "linuxParameters": {
                "capabilities": {"add": ["SYS_PTRACE", "NET_ADMIN"], "drop": []},
                "initProcessEnabled": true
            },
            "devices": [{"hostPath": "/dev/fuse", "permissions": ["write", "read"]}],
            "dockerLabels": {"team": "core", "app": "api"},
            "dockerSecurityOptions": ["no-new-privileges"]
        },
        {"name": "init", "image": "busybox", "memory": 32, "essential": false}
    ]"#;

    #[test]
    fn container_level_devices_move_under_linux_parameters() {
        let decoded = decode_container_definitions(SIDECAR).unwrap();
        let app = decoded.iter().find(|d| d.name == "app").unwrap();
        assert!(app.devices.is_empty());
        let params = app.linux_parameters.as_ref().unwrap();
        assert_eq!(params.devices.len(), 1);
        assert_eq!(params.devices[0].host_path, "/dev/fuse");

        let normalized = normalize_container_definitions(SIDECAR).unwrap();
        assert!(normalized.contains(r#""linuxParameters":{"capabilities":{"add":["NET_ADMIN","SYS_PTRACE"]}"#));
        assert!(normalized.contains(r#""devices":[{"hostPath":"/dev/fuse","permissions":["read","write"]}]"#));
        assert!(normalized.contains(r#""dockerLabels":{"app":"api","team":"core"}"#));
        assert!(!normalized.contains(r#""readOnly":false"#));
    }

    #[test]
    fn container_arrays_read_back_as_configured() {
        let sdk: Vec<ContainerDefinition> = decode_container_definitions(SIDECAR)
            .unwrap()
            .iter()
            .map(|d| d.to_sdk().unwrap())
            .collect();
        let app = &sdk[0];
        assert_eq!(app.ulimits()[0].name(), &UlimitName::Nofile);
        assert_eq!(app.extra_hosts()[0].ip_address(), "10.0.0.5");
        assert_eq!(app.mount_points().len(), 2);
        assert_eq!(app.volumes_from()[0].source_container(), Some("init"));
        assert_eq!(
            app.linux_parameters().unwrap().devices()[0].permissions(),
            &[DeviceCgroupPermission::Write, DeviceCgroupPermission::Read]
        );
        assert_eq!(
            app.docker_labels().and_then(|l| l.get("team")).map(String::as_str),
            Some("core")
        );

        assert_eq!(
            flatten_container_definitions(&sdk).unwrap(),
            normalize_container_definitions(SIDECAR).unwrap()
        );
    }

    fn object(entries: &[(&str, Value)]) -> Value {
        Value::Map(entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    fn task_settings() -> HashMap<String, Value> {
        HashMap::from([
            (
                "volume".to_string(),
                Value::List(vec![
                    object(&[
                        ("name", Value::from("shared")),
                        (
                            "docker_volume_configuration",
                            object(&[
                                ("scope", Value::from("shared")),
                                ("autoprovision", Value::Bool(true)),
                                ("driver", Value::from("local")),
                                ("labels", string_map_value([("tier", "cache")])),
                            ]),
                        ),
                    ]),
                    object(&[
                        ("name", Value::from("efs")),
                        (
                            "efs_volume_configuration",
                            object(&[
                                ("file_system_id", Value::from("fs-0123")),
                                ("transit_encryption", Value::from("ENABLED")),
                                ("transit_encryption_port", Value::Int(2999)),
                                (
                                    "authorization_config",
                                    object(&[
                                        ("access_point_id", Value::from("fsap-1")),
                                        ("iam", Value::from("ENABLED")),
                                    ]),
                                ),
                            ]),
                        ),
                    ]),
                    object(&[
                        ("name", Value::from("scratch")),
                        (
                            "docker_volume_configuration",
                            object(&[("autoprovision", Value::Bool(true))]),
                        ),
                    ]),
                    object(&[("name", Value::from("logs")), ("host_path", Value::from("/var/log"))]),
                ]),
            ),
            (
                "placement_constraints".to_string(),
                Value::List(vec![object(&[
                    ("type", Value::from("memberOf")),
                    ("expression", Value::from("attribute:ecs.os-type == linux")),
                ])]),
            ),
            (
                "proxy_configuration".to_string(),
                object(&[
                    ("container_name", Value::from("envoy")),
                    (
                        "properties",
                        string_map_value([("ProxyIngressPort", "15000"), ("AppPorts", "8080")]),
                    ),
                ]),
            ),
            (
                "inference_accelerator".to_string(),
                Value::List(vec![
                    object(&[
                        ("device_name", Value::from("b")),
                        ("device_type", Value::from("eia1.medium")),
                    ]),
                    object(&[
                        ("device_name", Value::from("a")),
                        ("device_type", Value::from("eia1.large")),
                    ]),
                ]),
            ),
            ("ipc_mode".to_string(), Value::from("aws.ecs.IpcMode.task")),
            ("pid_mode".to_string(), Value::from("host")),
        ])
    }

    #[test]
    fn volumes_round_trip() {
        let volumes = expand_volumes(&task_settings()).unwrap();
        assert_eq!(volumes.len(), 4);

        let shared = volumes[0].docker_volume_configuration().unwrap();
        assert_eq!(shared.scope(), Some(&Scope::Shared));
        assert_eq!(shared.autoprovision(), Some(true));
        // Task scoped volumes are never autoprovisioned
        let scratch = volumes[2].docker_volume_configuration().unwrap();
        assert_eq!(scratch.scope(), Some(&Scope::Task));
        assert_eq!(scratch.autoprovision(), None);

        let efs = volumes[1].efs_volume_configuration().unwrap();
        assert_eq!(efs.file_system_id(), "fs-0123");
        assert_eq!(efs.transit_encryption_port(), Some(2999));
        assert_eq!(
            efs.authorization_config().and_then(|a| a.iam()),
            Some(&EfsAuthorizationConfigIam::Enabled)
        );
        assert_eq!(volumes[3].host().and_then(|h| h.source_path()), Some("/var/log"));

        let flattened = flatten_volumes(&volumes);
        let names: Vec<&str> = flattened
            .as_list()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_map()?.get("name")?.as_str())
            .collect();
        assert_eq!(names, ["efs", "logs", "scratch", "shared"]);
        assert_eq!(
            expand_volumes(&HashMap::from([("volume".to_string(), flattened.clone())]))
                .map(|v| flatten_volumes(&v))
                .unwrap(),
            flattened
        );
    }

    #[test]
    fn task_settings_read_back_as_configured() {
        let mut configured = task_settings();
        normalize_task_definition_attributes(&mut configured).unwrap();
        assert_eq!(configured.get("ipc_mode"), Some(&Value::from("task")));

        let settings = task_settings();
        let task_definition = TaskDefinition::builder()
            .task_definition_arn("arn:aws:ecs:us-east-1:123456789012:task-definition/web:1")
            .family("web")
            .revision(1)
            .set_volumes(Some(expand_volumes(&settings).unwrap()))
            .set_placement_constraints(Some(expand_task_placement_constraints(&settings).unwrap()))
            .set_proxy_configuration(expand_proxy_configuration(&settings).unwrap())
            .set_inference_accelerators(Some(expand_inference_accelerators(&settings).unwrap()))
            .ipc_mode(IpcMode::Task)
            .pid_mode(PidMode::Host)
            .build();
        let read = flatten_task_definition(&task_definition, &[]).unwrap();

        for key in [
            "volume",
            "placement_constraints",
            "proxy_configuration",
            "inference_accelerator",
            "ipc_mode",
            "pid_mode",
        ] {
            assert_eq!(read.get(key), configured.get(key), "{}", key);
        }
        assert_eq!(
            read.get("proxy_configuration")
                .and_then(Value::as_map)
                .and_then(|p| p.get("type")),
            Some(&Value::from("APPMESH"))
        );
    }

    #[test]
    fn too_many_placement_constraints() {
        let constraint = object(&[("type", Value::from("memberOf")), ("expression", Value::from("x"))]);
        let attributes = HashMap::from([(
            "placement_constraints".to_string(),
            Value::List(vec![constraint; 11]),
        )]);
        let err = expand_task_placement_constraints(&attributes).unwrap_err();
        assert!(err.message.contains("at most 10"));
    }
}
