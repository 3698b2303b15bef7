//! Docker implementation of the container driver, via bollard.

use std::collections::HashMap;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, NetworkingConfig, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HostConfig, RestartPolicy, RestartPolicyNameEnum};
use futures_util::TryStreamExt;

use crate::driver::{ContainerDriver, ContainerStatus};
use crate::error::DriverError;
use crate::ship::{Ship, SHIP_PORT, parse_memory_size};

/// CPU period used to express fractional CPU limits (100ms, Docker's default).
const CPU_PERIOD_MICROS: i64 = 100_000;

pub struct DockerDriver {
    docker: Docker,
    image: String,
    network: String,
}

impl DockerDriver {
    /// Connect with the platform's default Docker socket and verify the
    /// daemon is reachable.
    pub async fn connect(image: String, network: String) -> Result<Self, DriverError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            DriverError::BackendUnavailable {
                reason: e.to_string(),
            }
        })?;
        docker
            .version()
            .await
            .map_err(|e| DriverError::BackendUnavailable {
                reason: format!("docker daemon not reachable: {e}"),
            })?;
        Ok(Self {
            docker,
            image,
            network,
        })
    }

    fn build_config(&self, ship: &Ship) -> Result<Config<String>, DriverError> {
        let mut host_config = HostConfig {
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                ..Default::default()
            }),
            ..Default::default()
        };

        if let Some(cpus) = ship.spec.cpus {
            host_config.cpu_quota = Some((cpus * CPU_PERIOD_MICROS as f64) as i64);
            host_config.cpu_period = Some(CPU_PERIOD_MICROS);
        }
        if let Some(ref memory) = ship.spec.memory {
            host_config.memory =
                Some(
                    parse_memory_size(memory).map_err(|reason| DriverError::BackendUnavailable {
                        reason,
                    })?,
                );
        }

        let networking_config = if self.network.is_empty() {
            None
        } else {
            Some(NetworkingConfig {
                endpoints_config: HashMap::from([(
                    self.network.clone(),
                    EndpointSettings::default(),
                )]),
            })
        };

        Ok(Config {
            image: Some(self.image.clone()),
            env: Some(vec![
                format!("SHIP_ID={}", ship.id),
                format!("TTL={}", ship.ttl),
            ]),
            labels: Some(HashMap::from([
                ("ship_id".to_string(), ship.id.clone()),
                ("created_by".to_string(), "bay".to_string()),
            ])),
            exposed_ports: Some(HashMap::from([(
                format!("{SHIP_PORT}/tcp"),
                HashMap::new(),
            )])),
            host_config: Some(host_config),
            networking_config,
            ..Default::default()
        })
    }

    async fn pull_image(&self) -> Result<(), DriverError> {
        tracing::info!(image = %self.image, "Pulling ship image");
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: self.image.clone(),
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| DriverError::BackendUnavailable {
                reason: format!("failed to pull image {}: {e}", self.image),
            })?;
        Ok(())
    }

    /// Container IP on the configured network, falling back to the runtime's
    /// default network address.
    fn resolve_ip(
        &self,
        network_settings: Option<bollard::models::NetworkSettings>,
    ) -> Option<String> {
        let settings = network_settings?;
        if !self.network.is_empty()
            && let Some(networks) = settings.networks.as_ref()
            && let Some(endpoint) = networks.get(&self.network)
            && let Some(ip) = endpoint.ip_address.as_ref()
            && !ip.is_empty()
        {
            return Some(ip.clone());
        }
        settings.ip_address.filter(|ip| !ip.is_empty())
    }
}

fn status_code(e: &bollard::errors::Error) -> Option<u16> {
    match e {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => {
            Some(*status_code)
        }
        _ => None,
    }
}

fn into_driver_error(container_id: &str, e: bollard::errors::Error) -> DriverError {
    match status_code(&e) {
        Some(404) => DriverError::NotFound {
            container_id: container_id.to_string(),
        },
        Some(409) => DriverError::AlreadyExists {
            name: container_id.to_string(),
        },
        _ => DriverError::BackendUnavailable {
            reason: e.to_string(),
        },
    }
}

#[async_trait::async_trait]
impl ContainerDriver for DockerDriver {
    async fn create(&self, ship: &Ship) -> Result<String, DriverError> {
        let config = self.build_config(ship)?;
        let options = CreateContainerOptions {
            name: format!("ship-{}", ship.id),
            ..Default::default()
        };

        let created = match self
            .docker
            .create_container(Some(options.clone()), config.clone())
            .await
        {
            Ok(resp) => resp,
            // 404 here means the image is missing: pull once and retry.
            Err(e) if status_code(&e) == Some(404) => {
                self.pull_image().await?;
                self.docker
                    .create_container(Some(options), config)
                    .await
                    .map_err(|e| into_driver_error(&ship.id, e))?
            }
            Err(e) => return Err(into_driver_error(&ship.id, e)),
        };

        Ok(created.id)
    }

    async fn start(&self, container_id: &str) -> Result<String, DriverError> {
        self.docker
            .start_container::<String>(container_id, None)
            .await
            .map_err(|e| into_driver_error(container_id, e))?;

        let status = self.inspect(container_id).await?;
        status
            .ip_address
            .ok_or_else(|| DriverError::BackendUnavailable {
                reason: format!("container {container_id} started without an address"),
            })
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, DriverError> {
        let info = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| into_driver_error(container_id, e))?;

        let running = info
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);

        Ok(ContainerStatus {
            running,
            ip_address: self.resolve_ip(info.network_settings),
        })
    }

    async fn logs(&self, container_id: &str, tail_bytes: usize) -> Result<Vec<u8>, DriverError> {
        let chunks: Vec<bollard::container::LogOutput> = self
            .docker
            .logs(
                container_id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    tail: "all".to_string(),
                    ..Default::default()
                }),
            )
            .try_collect()
            .await
            .map_err(|e| into_driver_error(container_id, e))?;

        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&chunk.into_bytes());
        }
        if out.len() > tail_bytes {
            out.drain(..out.len() - tail_bytes);
        }
        Ok(out)
    }

    async fn stop(&self, container_id: &str, grace: Duration) -> Result<(), DriverError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped (304) or already gone (404).
            Err(e) if matches!(status_code(&e), Some(304) | Some(404)) => Ok(()),
            Err(e) => Err(into_driver_error(container_id, e)),
        }
    }

    async fn remove(&self, container_id: &str) -> Result<(), DriverError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(into_driver_error(container_id, e)),
        }
    }
}
