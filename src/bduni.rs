//! Client for the BDUni vector database.
//!
//! Building and reservoir footprints are fetched through the shell
//! `pgsql2shp` utility into a 2D shapefile carrying a `PRESENCE = 1`
//! attribute; the territory/SRID consistency check goes through `psql`.
//! Projections are mixed in the database: geometries are declared with SRID
//! 0 but stored in the legal projection of their territory, so every query
//! joins on the territory table and compares envelopes at SRID 0.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::error;

use crate::error::{Error, Result};
use crate::geom::IntBbox;

/// Host and public credentials of the vector database.
#[derive(Debug, Clone, Deserialize)]
pub struct BdUniConnectionParams {
    pub host: String,
    pub user: String,
    pub pwd: String,
    pub bd_name: String,
}

/// Request tuning: bbox inflation, wall-clock budget, and the reservoir
/// nature categories worth keeping (water towers and industrial tanks by
/// default; other reservoirs are not buildings).
#[derive(Debug, Clone, Deserialize)]
pub struct BdUniRequestParams {
    #[serde(default = "default_buffer")]
    pub buffer: f64,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_reservoir_natures")]
    pub reservoir_natures: Vec<String>,
}

fn default_buffer() -> f64 {
    50.0
}

fn default_timeout_s() -> u64 {
    120
}

fn default_reservoir_natures() -> Vec<String> {
    vec!["Château d'eau".to_string(), "Réservoir industriel".to_string()]
}

impl Default for BdUniRequestParams {
    fn default() -> Self {
        Self {
            buffer: default_buffer(),
            timeout_s: default_timeout_s(),
            reservoir_natures: default_reservoir_natures(),
        }
    }
}

/// Outcome of a footprint fetch. An empty zone is a normal result, distinct
/// from every failure mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The shapefile at the returned path holds at least one polygon.
    Polygons(PathBuf),
    /// No building or reservoir intersects the bbox; no overlay applies.
    Empty,
}

/// Fetch the building ∪ reservoir footprints intersecting `bbox` into
/// `shapefile_path`. Fails with [`Error::BadProjection`] when the bbox does
/// not lie in any territory declared with `srid`.
pub fn fetch_building_footprints(
    connection: &BdUniConnectionParams,
    request: &BdUniRequestParams,
    shapefile_path: &Path,
    bbox: IntBbox,
    srid: u32,
) -> Result<FetchOutcome> {
    if !check_bbox_intersects_territory(connection, request, bbox, srid)? {
        return Err(Error::BadProjection { bbox, srid });
    }

    let sql = footprints_sql(bbox, srid, &request.reservoir_natures);
    let mut command = Command::new("pgsql2shp");
    command
        .arg("-f")
        .arg(shapefile_path)
        .args(["-h", connection.host.as_str()])
        .args(["-u", connection.user.as_str()])
        .args(["-P", connection.pwd.as_str()])
        .arg(&connection.bd_name)
        .arg(sql)
        .env("PGCLIENTENCODING", "UTF8");

    let output = run_with_timeout(command, Duration::from_secs(request.timeout_s))?;
    if !output.status_success {
        // In empty zones pgsql2shp creates nothing and reports an empty table.
        if is_empty_table_diagnostic(&output.merged()) {
            return Ok(FetchOutcome::Empty);
        }
        error!("pgsql2shp failed: {}", output.merged().trim());
        return Err(Error::DatabaseUnavailable(output.merged().trim().to_string()));
    }

    Ok(FetchOutcome::Polygons(shapefile_path.to_path_buf()))
}

/// True when `bbox` intersects the union of the territory footprints
/// declared with `srid`. Both envelopes are compared at SRID 0, matching how
/// the database stores its geometries.
pub fn check_bbox_intersects_territory(
    connection: &BdUniConnectionParams,
    request: &BdUniRequestParams,
    bbox: IntBbox,
    srid: u32,
) -> Result<bool> {
    let query = territory_sql(bbox, srid);
    let mut command = Command::new("psql");
    command
        .args(["-h", connection.host.as_str()])
        .args(["-U", connection.user.as_str()])
        .args(["-d", connection.bd_name.as_str()])
        .args(["-t", "-A", "-c", query.as_str()])
        .env("PGPASSWORD", &connection.pwd);

    let output = run_with_timeout(command, Duration::from_secs(request.timeout_s))?;
    if !output.status_success {
        error!("territory check failed: {}", output.merged().trim());
        return Err(Error::DatabaseUnavailable(output.merged().trim().to_string()));
    }
    Ok(output.stdout.trim() == "t")
}

fn territory_sql(bbox: IntBbox, srid: u32) -> String {
    format!(
        "SELECT ST_Intersects( \
         ST_MakeEnvelope({}, {}, {}, {}, 0), \
         ST_SetSRID(ST_Envelope(ST_Union(ST_Force2D(geometrie))), 0))::bool \
         FROM public.gcms_territoire WHERE srid = '{srid}' LIMIT 1;",
        bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max
    )
}

/// Buildings and selected reservoirs intersecting the bbox, destroyed
/// features excluded, forced to 2D, with a `presence` column for the
/// downstream overlay.
fn footprints_sql(bbox: IntBbox, srid: u32, reservoir_natures: &[String]) -> String {
    let envelope = format!(
        "ST_MakeEnvelope({}, {}, {}, {}, 0)",
        bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max
    );
    let natures = reservoir_natures
        .iter()
        .map(|nature| format!("reservoir.nature = '{}'", nature.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(" OR ");

    let territory = format!(
        "WITH territoire(code) AS \
         (SELECT code FROM public.gcms_territoire WHERE srid = {srid}) "
    );
    let buildings = format!(
        "SELECT ST_MakeValid(ST_Force2D(ST_SetSRID(batiment.geometrie, {srid}))) AS geometry, \
         1 AS presence FROM batiment, territoire \
         WHERE (batiment.gcms_territoire = territoire.code) \
         AND batiment.geometrie && {envelope} AND NOT gcms_detruit"
    );
    let reservoirs = format!(
        "SELECT ST_MakeValid(ST_Force2D(ST_SetSRID(reservoir.geometrie, {srid}))) AS geometry, \
         1 AS presence FROM reservoir, territoire \
         WHERE (reservoir.gcms_territoire = territoire.code) \
         AND reservoir.geometrie && {envelope} AND ({natures}) AND NOT gcms_detruit"
    );

    format!("{territory}{buildings} UNION {reservoirs}")
}

/// The diagnostic pgsql2shp prints when the query matches no row.
fn is_empty_table_diagnostic(output: &str) -> bool {
    output.contains("Could not determine table metadata (empty table)")
}

struct ProcessOutput {
    status_success: bool,
    stdout: String,
    stderr: String,
}

impl ProcessOutput {
    /// Both streams, for diagnostics that may land on either.
    fn merged(&self) -> String {
        let mut merged = self.stdout.clone();
        merged.push_str(&self.stderr);
        merged
    }
}

/// Run a command with a wall-clock budget. On expiry the child is killed and
/// the call fails with [`Error::DatabaseTimeout`]; a missing utility or
/// spawn failure surfaces as [`Error::DatabaseUnavailable`].
fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<ProcessOutput> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped()).stdin(Stdio::null());
    let mut child = command
        .spawn()
        .map_err(|e| Error::DatabaseUnavailable(format!("failed to launch database client: {e}")))?;

    // Drain the pipes off-thread so a chatty child cannot deadlock on a
    // full pipe while we poll for exit.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                kill_quietly(&mut child);
                return Err(Error::DatabaseTimeout(timeout.as_secs()));
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(e) => {
                kill_quietly(&mut child);
                return Err(Error::DatabaseUnavailable(format!("database client wait failed: {e}")));
            }
        }
    };

    Ok(ProcessOutput {
        status_success: status.success(),
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buffer);
        }
        buffer
    })
}

fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
