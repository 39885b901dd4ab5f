//! Docker implementation of the runtime capability.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use tracing::{debug, warn};

use foglet_core::{Registry, Workload};

use crate::error::{RuntimeError, RuntimeResult};
use crate::{ContainerInfo, ContainerRuntime};

/// Label carrying the owning workload uuid on agent-managed containers.
const WORKLOAD_LABEL: &str = "io.foglet.workload";

/// Seconds a container gets to exit before the stop is forced.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Runtime adapter over the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect with the daemon's default local settings (unix socket).
    pub fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    fn container_name(uuid: &str) -> String {
        format!("foglet_{uuid}")
    }

    async fn inspect(&self, container_id: &str) -> RuntimeResult<bollard::models::ContainerInspectResponse> {
        self.docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(map_err)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![WORKLOAD_LABEL.to_string()]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_err)?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerInfo {
                    id: c.id?,
                    image_id: c.image_id.unwrap_or_default(),
                    status: c.state.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn container_by_uuid(&self, uuid: &str) -> RuntimeResult<Option<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{WORKLOAD_LABEL}={uuid}")],
        );
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let mut containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_err)?;

        Ok(containers.pop().and_then(|c| {
            Some(ContainerInfo {
                id: c.id?,
                image_id: c.image_id.unwrap_or_default(),
                status: c.state.unwrap_or_default(),
            })
        }))
    }

    async fn find_local_image(&self, image: &str) -> RuntimeResult<bool> {
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![image.to_string()]);
        let options = ListImagesOptions {
            all: false,
            filters,
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(map_err)?;
        Ok(!images.is_empty())
    }

    async fn pull_image(&self, image: &str, registry: &Registry) -> RuntimeResult<()> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let credentials = (!registry.username.is_empty()).then(|| DockerCredentials {
            username: Some(registry.username.clone()),
            password: Some(registry.password.clone()),
            serveraddress: Some(registry.url.clone()),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(progress) = stream.next().await {
            let info = progress.map_err(map_err)?;
            if let Some(status) = info.status {
                debug!(%image, %status, "pull progress");
            }
        }
        Ok(())
    }

    async fn create_container(&self, workload: &Workload, host_ip: &str) -> RuntimeResult<String> {
        let labels = HashMap::from([(WORKLOAD_LABEL.to_string(), workload.uuid.clone())]);
        let env = vec![
            format!("SELFNAME={}", workload.uuid),
            format!("IOFOG_DAEMON={host_ip}"),
        ];
        let config = ContainerConfig {
            image: Some(workload.image_name.clone()),
            labels: Some(labels),
            env: Some(env),
            host_config: Some(HostConfig {
                extra_hosts: Some(vec![format!("iofog:{host_ip}")]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Self::container_name(&workload.uuid),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_err)?;

        for warning in &created.warnings {
            warn!(uuid = %workload.uuid, %warning, "container create warning");
        }
        Ok(created.id)
    }

    async fn start_container(&self, container_id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container::<String>(container_id, None)
            .await
            .map_err(map_err)
    }

    async fn stop_container(&self, container_id: &str) -> RuntimeResult<()> {
        self.docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await
            .map_err(map_err)
    }

    async fn remove_container(&self, container_id: &str) -> RuntimeResult<()> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_err)
    }

    async fn remove_image(&self, image_id: &str) -> RuntimeResult<()> {
        self.docker
            .remove_image(
                image_id,
                Some(RemoveImageOptions {
                    force: false,
                    ..Default::default()
                }),
                None,
            )
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn is_container_running(&self, container_id: &str) -> RuntimeResult<bool> {
        let detail = self.inspect(container_id).await?;
        Ok(detail
            .state
            .and_then(|s| s.running)
            .unwrap_or(false))
    }

    async fn container_status(&self, container_id: &str) -> RuntimeResult<Option<String>> {
        let detail = self.inspect(container_id).await?;
        Ok(detail
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string()))
    }

    async fn container_ip(&self, container_id: &str) -> RuntimeResult<String> {
        let detail = self.inspect(container_id).await?;
        let ip = detail
            .network_settings
            .and_then(|s| s.networks)
            .and_then(|networks| {
                networks
                    .values()
                    .find_map(|n| n.ip_address.clone().filter(|ip| !ip.is_empty()))
            });
        ip.ok_or_else(|| RuntimeError::NotFound(format!("no ip address for {container_id}")))
    }
}

/// Map a bollard error onto the runtime error taxonomy.
fn map_err(e: bollard::errors::Error) -> RuntimeError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 => RuntimeError::NotFound(message),
            409 => RuntimeError::Conflict(message),
            _ => RuntimeError::Rejected(message),
        },
        other => RuntimeError::Unavailable(other.to_string()),
    }
}
