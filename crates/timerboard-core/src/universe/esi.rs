//! Build a [`UniverseTable`] from the game's public ESI API.
//!
//! Walks regions -> constellations -> systems -> stargates. Every system gets
//! its region; every stargate contributes one gate to the destination system.
//! Requests run concurrently up to a fixed limit. Individual failures are
//! logged and skipped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::table::{SystemEntry, UniverseTable};
use crate::error::{CoreError, Result};

pub const DEFAULT_ESI_BASE: &str = "https://esi.evetech.net/latest";
pub const DEFAULT_CONCURRENCY: usize = 32;

const USER_AGENT: &str = concat!("timerboard/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Region {
    name: String,
    #[serde(default)]
    constellations: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct Constellation {
    region_id: u32,
    #[serde(default)]
    systems: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct SolarSystem {
    system_id: u32,
    name: String,
    constellation_id: u32,
    #[serde(default)]
    stargates: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct Stargate {
    system_id: u32,
    destination: Destination,
}

#[derive(Debug, Deserialize)]
struct Destination {
    system_id: u32,
}

pub struct EsiClient {
    client: Client,
    base: String,
    concurrency: usize,
}

impl EsiClient {
    /// # Errors
    /// Returns an error for a malformed base URL.
    pub fn new(base: &str, concurrency: usize) -> Result<Self> {
        url::Url::parse(base)
            .map_err(|e| CoreError::Universe(format!("invalid ESI base '{base}': {e}")))?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CoreError::Universe(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            concurrency: concurrency.max(1),
        })
    }

    /// Fetch the whole map.
    ///
    /// # Errors
    /// Fails only if the region list itself cannot be fetched or no system
    /// could be resolved.
    pub async fn fetch_table(&self) -> Result<UniverseTable> {
        let region_ids: Vec<u32> = get_json(&self.client, &format!("{}/universe/regions/", self.base))
            .await
            .map_err(|e| CoreError::Universe(format!("region list: {e}")))?;
        tracing::info!(regions = region_ids.len(), "fetching regions");

        let regions: Vec<(u32, Region)> = self
            .fetch_each(&region_ids, |id| format!("/universe/regions/{id}/"))
            .await;
        let region_names: HashMap<u32, String> = regions
            .iter()
            .map(|(id, region)| (*id, region.name.clone()))
            .collect();

        let constellation_ids: Vec<u32> = regions
            .iter()
            .flat_map(|(_, region)| region.constellations.iter().copied())
            .collect();
        tracing::info!(constellations = constellation_ids.len(), "fetching constellations");
        let constellations: HashMap<u32, Constellation> = self
            .fetch_each(&constellation_ids, |id| format!("/universe/constellations/{id}/"))
            .await
            .into_iter()
            .collect();

        let system_ids: Vec<u32> = constellations
            .values()
            .flat_map(|c| c.systems.iter().copied())
            .collect();
        tracing::info!(systems = system_ids.len(), "fetching systems");
        let systems: Vec<SolarSystem> = self
            .fetch_each(&system_ids, |id| format!("/universe/systems/{id}/"))
            .await
            .into_iter()
            .map(|(_, system)| system)
            .collect();
        if systems.is_empty() {
            return Err(CoreError::Universe("no systems could be fetched".into()));
        }

        let gate_ids: Vec<u32> = systems
            .iter()
            .flat_map(|s| s.stargates.iter().copied())
            .collect();
        tracing::info!(stargates = gate_ids.len(), "fetching stargates");
        let gates: Vec<Stargate> = self
            .fetch_each(&gate_ids, |id| format!("/universe/stargates/{id}/"))
            .await
            .into_iter()
            .map(|(_, gate)| gate)
            .collect();

        let region_of = |system: &SolarSystem| {
            constellations
                .get(&system.constellation_id)
                .and_then(|c| region_names.get(&c.region_id))
                .cloned()
        };
        Ok(build_table(&systems, &gates, region_of))
    }

    /// GET `path(id)` for every id; failures are logged and left out.
    async fn fetch_each<T, P>(&self, ids: &[u32], path: P) -> Vec<(u32, T)>
    where
        T: DeserializeOwned + Send + 'static,
        P: Fn(u32) -> String,
    {
        let limit = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for &id in ids {
            let url = format!("{}{}", self.base, path(id));
            tasks.spawn(limited(
                Arc::clone(&limit),
                fetch_one::<T>(self.client.clone(), url, id),
            ));
        }

        let mut fetched = Vec::with_capacity(ids.len());
        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(item)) => fetched.push(item),
                Ok(None) => failed += 1,
                Err(err) => {
                    tracing::warn!(error = %err, "ESI fetch task failed");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            tracing::warn!(failed, fetched = fetched.len(), "some ESI requests failed, skipped");
        }
        fetched.sort_by_key(|(id, _)| *id);
        fetched
    }
}

async fn limited<F: Future>(limit: Arc<Semaphore>, work: F) -> F::Output {
    // The semaphore is never closed, so acquiring only waits.
    let _permit = limit.acquire_owned().await.ok();
    work.await
}

async fn fetch_one<T: DeserializeOwned>(client: Client, url: String, id: u32) -> Option<(u32, T)> {
    match get_json(&client, &url).await {
        Ok(value) => Some((id, value)),
        Err(err) => {
            tracing::warn!(%url, error = %err, "ESI request failed");
            None
        }
    }
}

async fn get_json<T: DeserializeOwned>(client: &Client, url: &str) -> std::result::Result<T, String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = resp.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status.as_u16()));
    }
    resp.json().await.map_err(|e| e.to_string())
}

/// Assemble the table: systems sorted by name, gates deduplicated and sorted.
fn build_table(
    systems: &[SolarSystem],
    gates: &[Stargate],
    region_of: impl Fn(&SolarSystem) -> Option<String>,
) -> UniverseTable {
    let names: HashMap<u32, &str> = systems
        .iter()
        .map(|s| (s.system_id, s.name.as_str()))
        .collect();

    let mut links: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for gate in gates {
        if let (Some(&from), Some(&to)) = (
            names.get(&gate.system_id),
            names.get(&gate.destination.system_id),
        ) {
            links.entry(from).or_default().insert(to);
            links.entry(to).or_default().insert(from);
        }
    }

    let mut entries: Vec<SystemEntry> = systems
        .iter()
        .map(|system| SystemEntry {
            name: system.name.clone(),
            region: region_of(system),
            gates: links
                .get(system.name.as_str())
                .map(|set| set.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    UniverseTable { systems: entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::{Distance, LocationGraph};

    async fn mock_json(server: &mut mockito::Server, path: &str, body: &str) -> mockito::Mock {
        server
            .mock("GET", path)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    #[test]
    fn rejects_bad_base() {
        assert!(EsiClient::new("esi please", 4).is_err());
    }

    #[tokio::test]
    async fn builds_table_from_regions_down_to_stargates() {
        let mut server = mockito::Server::new_async().await;
        mock_json(&mut server, "/universe/regions/", "[10000001, 10000002]").await;
        mock_json(
            &mut server,
            "/universe/regions/10000001/",
            r#"{"region_id":10000001,"name":"Tenerifis","constellations":[20000001]}"#,
        )
        .await;
        // A region that fails is skipped, not fatal.
        server
            .mock("GET", "/universe/regions/10000002/")
            .with_status(502)
            .create_async()
            .await;
        mock_json(
            &mut server,
            "/universe/constellations/20000001/",
            r#"{"constellation_id":20000001,"region_id":10000001,"systems":[30000001,30000002,30000003]}"#,
        )
        .await;
        mock_json(
            &mut server,
            "/universe/systems/30000001/",
            r#"{"system_id":30000001,"name":"OJOS-T","constellation_id":20000001,"stargates":[50000001]}"#,
        )
        .await;
        mock_json(
            &mut server,
            "/universe/systems/30000002/",
            r#"{"system_id":30000002,"name":"9PX2-F","constellation_id":20000001,"stargates":[50000002,50000003]}"#,
        )
        .await;
        mock_json(
            &mut server,
            "/universe/systems/30000003/",
            r#"{"system_id":30000003,"name":"R-ZUOL","constellation_id":20000001,"stargates":[50000004]}"#,
        )
        .await;
        mock_json(
            &mut server,
            "/universe/stargates/50000001/",
            r#"{"stargate_id":50000001,"system_id":30000001,"destination":{"stargate_id":50000002,"system_id":30000002}}"#,
        )
        .await;
        mock_json(
            &mut server,
            "/universe/stargates/50000002/",
            r#"{"stargate_id":50000002,"system_id":30000002,"destination":{"stargate_id":50000001,"system_id":30000001}}"#,
        )
        .await;
        mock_json(
            &mut server,
            "/universe/stargates/50000003/",
            r#"{"stargate_id":50000003,"system_id":30000002,"destination":{"stargate_id":50000004,"system_id":30000003}}"#,
        )
        .await;
        mock_json(
            &mut server,
            "/universe/stargates/50000004/",
            r#"{"stargate_id":50000004,"system_id":30000003,"destination":{"stargate_id":50000003,"system_id":30000002}}"#,
        )
        .await;

        let esi = EsiClient::new(&server.url(), 2).unwrap();
        let table = esi.fetch_table().await.unwrap();

        let names: Vec<&str> = table.systems.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["9PX2-F", "OJOS-T", "R-ZUOL"]);
        assert_eq!(table.systems[0].gates, ["OJOS-T", "R-ZUOL"]);
        assert_eq!(table.systems[1].region.as_deref(), Some("Tenerifis"));

        let graph = LocationGraph::from_table(&table);
        assert_eq!(graph.distance("OJOS-T", "R-ZUOL"), Distance::Jumps(2));
    }

    #[tokio::test]
    async fn missing_region_list_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/universe/regions/")
            .with_status(503)
            .create_async()
            .await;
        let esi = EsiClient::new(&server.url(), 2).unwrap();
        assert!(matches!(
            esi.fetch_table().await,
            Err(CoreError::Universe(_))
        ));
    }
}
