// keep in sync with api.rs of backend
use anyhow::Result;
use async_trait::async_trait;
use common::req::{Device, DeviceUpsert, Floorplan, FloorplanUpsert, Mode, ModeChange};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;

/// The slice of the REST surface the sync controller talks to. Kept behind a
/// trait so the controller can run against an in-memory store in tests.
#[async_trait(?Send)]
pub trait Backend {
    async fn device(&self, id: &str) -> Result<Option<Device>>;
    async fn create_device(&self, name: &str) -> Result<Device>;
    async fn set_device_name(&self, id: &str, name: &str) -> Result<Device>;
    async fn set_device_mode(&self, id: &str, mode: Mode) -> Result<Device>;
    async fn latest_floorplan(&self) -> Result<Option<Floorplan>>;
    async fn create_floorplan(&self, body: &FloorplanUpsert) -> Result<Floorplan>;
    async fn update_floorplan(&self, id: &str, body: &FloorplanUpsert) -> Result<Floorplan>;
}

pub struct HttpApi {
    host: String,
    client: reqwest::Client,
}

impl HttpApi {
    /// `host` is the server origin, e.g. `http://127.0.0.1:3001`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, endpoint: &str) -> String {
        let host_url = &self.host;
        format!("{host_url}/{endpoint}")
    }
}

#[async_trait(?Send)]
impl Backend for HttpApi {
    async fn device(&self, id: &str) -> Result<Option<Device>> {
        let res = self
            .client
            .get(self.api_url(&format!("api/devices/{id}")))
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(res.error_for_status()?.json::<Device>().await?))
    }

    async fn create_device(&self, name: &str) -> Result<Device> {
        let body = DeviceUpsert {
            name: Some(name.to_string()),
            ..Default::default()
        };
        Ok(self
            .client
            .post(self.api_url("api/devices"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<Device>()
            .await?)
    }

    async fn set_device_name(&self, id: &str, name: &str) -> Result<Device> {
        let body = DeviceUpsert {
            name: Some(name.to_string()),
            ..Default::default()
        };
        Ok(self
            .client
            .put(self.api_url(&format!("api/devices/{id}")))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<Device>()
            .await?)
    }

    async fn set_device_mode(&self, id: &str, mode: Mode) -> Result<Device> {
        let body = ModeChange {
            mode: Some(mode.to_string()),
        };
        Ok(self
            .client
            .patch(self.api_url(&format!("api/devices/{id}/mode")))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<Device>()
            .await?)
    }

    async fn latest_floorplan(&self) -> Result<Option<Floorplan>> {
        let res = self
            .client
            .get(self.api_url("api/floorplans/latest/current"))
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(res.error_for_status()?.json::<Floorplan>().await?))
    }

    async fn create_floorplan(&self, body: &FloorplanUpsert) -> Result<Floorplan> {
        Ok(self
            .client
            .post(self.api_url("api/floorplans"))
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json::<Floorplan>()
            .await?)
    }

    async fn update_floorplan(&self, id: &str, body: &FloorplanUpsert) -> Result<Floorplan> {
        Ok(self
            .client
            .put(self.api_url(&format!("api/floorplans/{id}")))
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json::<Floorplan>()
            .await?)
    }
}
