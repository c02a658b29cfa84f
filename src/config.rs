//! # Config
//!
//! What gets instrumented: the methods to rewrite, the field reads to redirect, and the override
//! table each redirected read consults. Tables are fixed when the configuration is built.

use std::borrow::Cow;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::replace::{NameSet, ReplacementTable};
use crate::resolve::MethodTarget;
use crate::runtime::Value;

/// Owner id of the parking lot instrumentation
pub const PARKING_LOTS_ID: &str = "com.azka.ampl";

/// How a building is placed. Values match the host's enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum PlacementMode {
    /// Snaps to the side of a road
    Roadside = 0,
    /// Placed on a shoreline
    Shoreline = 1,
    /// Placed on water
    OnWater = 2,
    /// Placed anywhere on the ground
    OnGround = 3,
    /// Placed on any surface
    OnSurface = 4,
    /// Follows the terrain
    OnTerrain = 5,
}
impl From<PlacementMode> for Value {
    fn from(mode: PlacementMode) -> Self {
        Value::Int(mode as i64)
    }
}

lazy_static! {
    /// Parking lot assets that must be placed like roadside buildings
    pub static ref PARKING_LOT_ASSETS: NameSet = NameSet::new([
        "3563113487.AMPL Pavement Normal_Data",
        "3563113487.AMPL Pavement Disabled_Data",
        "3563113487.AMPL Pavement Custom_Data",
        "3563113487.AMPL Pavement Electric_Data",
        "3563113487.AMPL Gravel_Data",
    ]);
}

/// One field read to redirect
#[derive(Clone, Debug)]
pub struct PatternConfig {
    /// Type declaring the field
    pub owner: Cow<'static, str>,
    /// Field whose reads are redirected
    pub field: Cow<'static, str>,
    /// String field holding each instance's identity
    pub identity_field: Cow<'static, str>,
    /// Name the override function is registered under, unique per host
    pub function: Cow<'static, str>,
    /// Override table
    pub table: Arc<ReplacementTable>,
}

/// Everything one engine instruments
#[derive(Clone, Debug)]
pub struct InstrumentationConfig {
    /// Owner id, used in logs and to namespace registered functions
    pub id: Cow<'static, str>,
    /// Methods to rewrite
    pub targets: Vec<MethodTarget>,
    /// Field reads to redirect inside those methods
    pub patterns: Vec<PatternConfig>,
}

impl InstrumentationConfig {
    /// Parking lot assets: their placement mode reads as roadside wherever building placement is
    /// simulated, created, or validated
    pub fn parking_lots() -> Self {
        Self {
            id: PARKING_LOTS_ID.into(),
            targets: vec![
                MethodTarget::method("BuildingTool", "SimulationStep"),
                MethodTarget::method("BuildingTool", "CreateBuilding"),
                MethodTarget::method("BuildingAI", "CheckBuildPosition"),
            ],
            patterns: vec![PatternConfig {
                owner: "BuildingInfo".into(),
                field: "m_placementMode".into(),
                identity_field: "name".into(),
                function: format!("{}::GetPlacementMode", PARKING_LOTS_ID).into(),
                table: Arc::new(ReplacementTable::new(
                    PARKING_LOT_ASSETS.clone(),
                    PlacementMode::Roadside,
                    PlacementMode::OnGround,
                )),
            }],
        }
    }
}
