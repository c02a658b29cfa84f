//! Test fixture: a runtime loaded with a few city-builder types

use std::sync::Arc;

use crate::code::{FieldId, Instr, MethodId, TypeId};

use super::{Runtime, Signature, Value, ValueType};

/// A loaded city-builder runtime and the handles tests need
pub(crate) struct City {
    /// The runtime
    pub runtime: Arc<Runtime>,
    /// `BuildingInfo`
    pub building_info: TypeId,
    /// `BuildingInfo::m_placementMode`
    pub placement_mode: FieldId,
    /// `BuildingInfo::m_cellWidth`
    pub cell_width: FieldId,
    /// `BuildingTool::SimulationStep(BuildingInfo, BuildingInfo)`: reads the placement mode twice
    pub simulation_step: MethodId,
    /// `BuildingTool::CreateBuilding(BuildingInfo)`: branches on the placement mode
    pub create_building: MethodId,
    /// `BuildingTool::GetConstructionCost(BuildingInfo)`: never reads the placement mode
    pub construction_cost: MethodId,
    /// `BuildingTool::GetConstructionCost(BuildingInfo, int)`: reads the placement mode once
    pub construction_cost_at: MethodId,
    /// `BuildingAI::CheckBuildPosition(BuildingInfo)`
    pub check_build_position: MethodId,
}

impl City {
    /// Loads the city with the instrumentation subsystem installed but not ready
    pub fn load() -> Self {
        Self::load_with(|_| {})
    }

    /// Loads the city with the instrumentation subsystem ready
    pub fn load_ready() -> Self {
        Self::load_with(|builder| {
            builder.ready();
        })
    }

    /// Loads the city with no instrumentation subsystem
    pub fn load_without_hooks() -> Self {
        Self::load_with(|builder| {
            builder.without_hook_subsystem();
        })
    }

    /// Loads the city, letting `configure` adjust the builder first
    fn load_with(configure: impl FnOnce(&mut super::RuntimeBuilder)) -> Self {
        let mut builder = Runtime::builder();
        configure(&mut builder);

        let building_info = builder.define_type("BuildingInfo");
        builder.define_field(building_info, "name", ValueType::Str);
        let placement_mode = builder.define_field(building_info, "m_placementMode", ValueType::Int);
        let cell_width = builder.define_field(building_info, "m_cellWidth", ValueType::Int);
        let info = ValueType::Object(building_info);

        let tool = builder.define_type("BuildingTool");
        let simulation_step = builder.define_method(
            tool,
            "SimulationStep",
            Signature::new(vec![info, info], ValueType::Int),
            vec![
                Instr::LdArg(0),
                Instr::LdFld(placement_mode),
                Instr::LdInt(10),
                Instr::Mul,
                Instr::LdArg(1),
                Instr::LdFld(placement_mode),
                Instr::Add,
                Instr::Ret,
            ],
        );
        let create_building = builder.define_method(
            tool,
            "CreateBuilding",
            Signature::new(vec![info], ValueType::Int),
            vec![
                Instr::LdArg(0),
                Instr::LdFld(placement_mode),
                Instr::LdInt(0),
                Instr::CmpEq,
                // skip `LdInt(1); Ret`
                Instr::BrFalse(6),
                Instr::LdInt(1),
                Instr::Ret,
                Instr::LdInt(2),
                Instr::Ret,
            ],
        );
        let construction_cost = builder.define_method(
            tool,
            "GetConstructionCost",
            Signature::new(vec![info], ValueType::Int),
            vec![
                Instr::LdArg(0),
                Instr::LdFld(cell_width),
                Instr::LdInt(100),
                Instr::Mul,
                Instr::Ret,
            ],
        );
        let construction_cost_at = builder.define_method(
            tool,
            "GetConstructionCost",
            Signature::new(vec![info, ValueType::Int], ValueType::Int),
            vec![
                Instr::LdArg(1),
                Instr::LdArg(0),
                Instr::LdFld(placement_mode),
                Instr::Add,
                Instr::Ret,
            ],
        );

        let ai = builder.define_type("BuildingAI");
        let check_build_position = builder.define_method(
            ai,
            "CheckBuildPosition",
            Signature::new(vec![info], ValueType::Int),
            vec![Instr::LdArg(0), Instr::LdFld(placement_mode), Instr::Ret],
        );

        Self {
            runtime: Arc::new(builder.build().unwrap()),
            building_info,
            placement_mode,
            cell_width,
            simulation_step,
            create_building,
            construction_cost,
            construction_cost_at,
            check_build_position,
        }
    }

    /// Creates a `BuildingInfo` named `name` with the given placement mode and a cell width of 4
    pub fn building(&self, name: &str, placement_mode: i64) -> Value {
        self.runtime
            .instantiate(
                self.building_info,
                vec![name.into(), placement_mode.into(), Value::Int(4)],
            )
            .unwrap()
    }
}
