//! Dashboard layout editor.
//!
//! The layout is a keyed list of modules drawn from a fixed catalogue.
//! Modules added to the catalogue later appear at the end of existing
//! layouts; retired ones disappear.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tether_engine::{FieldDef, FieldType, ListShape, ObjectShape, Result, Revision, ShapeDescriptor};

use super::numbers::u32_lenient;
use super::SyncContext;
use crate::{DocumentKey, SyncEngine};

/// Shape version of the dashboard document.
pub const DASHBOARD_SHAPE_VERSION: u32 = 1;

/// Modules hidden from demo accounts.
pub const AI_MODULES: [&str; 2] = ["svatbot-coach", "moodboard"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleSize {
    Small,
    Medium,
    Large,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    Grid,
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustomSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPosition {
    #[serde(deserialize_with = "u32_lenient")]
    pub row: u32,
    #[serde(deserialize_with = "u32_lenient")]
    pub column: u32,
}

/// One dashboard card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardModule {
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: String,
    pub title: String,
    pub size: ModuleSize,
    /// Position in free layout mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_size: Option<CustomSize>,
    /// Legacy grid placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_position: Option<GridPosition>,
    pub is_visible: bool,
    pub is_locked: bool,
    #[serde(deserialize_with = "u32_lenient")]
    pub order: u32,
}

impl DashboardModule {
    fn new(id: &str, title: &str, size: ModuleSize, order: u32) -> Self {
        Self {
            id: id.to_string(),
            module_type: id.to_string(),
            title: title.to_string(),
            size,
            position: None,
            custom_size: None,
            grid_position: None,
            is_visible: true,
            is_locked: false,
            order,
        }
    }

    fn at(mut self, x: f64, y: f64, row: u32, column: u32) -> Self {
        self.position = Some(Position { x, y });
        self.grid_position = Some(GridPosition { row, column });
        self
    }

    fn sized(mut self, width: f64, height: f64) -> Self {
        self.custom_size = Some(CustomSize { width, height });
        self
    }
}

/// The synced dashboard document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardLayout {
    pub modules: Vec<DashboardModule>,
    pub is_edit_mode: bool,
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_mode: Option<LayoutMode>,
}

impl DashboardLayout {
    /// The default layout; AI modules start hidden for demo accounts.
    pub fn defaults(demo_user: bool) -> Self {
        let mut modules = default_modules();
        if demo_user {
            for module in &mut modules {
                if AI_MODULES.contains(&module.id.as_str()) {
                    module.is_visible = false;
                }
            }
        }

        Self {
            modules,
            is_edit_mode: false,
            is_locked: false,
            layout_mode: None,
        }
    }
}

/// The module catalogue in its default order.
pub fn default_modules() -> Vec<DashboardModule> {
    use ModuleSize::*;

    vec![
        DashboardModule::new("wedding-countdown", "Wedding countdown", Large, 0).at(40.0, 40.0, 0, 0),
        DashboardModule::new("svatbot-coach", "AI wedding coach", Medium, 1)
            .at(840.0, 40.0, 0, 2)
            .sized(360.0, 800.0),
        DashboardModule::new("quick-actions", "Quick actions", Medium, 2).at(40.0, 320.0, 1, 0),
        DashboardModule::new("task-management", "Tasks", Medium, 3)
            .at(840.0, 1680.0, 1, 1)
            .sized(360.0, 450.0),
        DashboardModule::new("guest-management", "Guests", Medium, 4).at(40.0, 880.0, 2, 0),
        DashboardModule::new("seating-plan", "Seating plan", Medium, 5).at(440.0, 880.0, 2, 1),
        DashboardModule::new("vendor-management", "Vendors", Medium, 6).at(840.0, 880.0, 2, 2),
        DashboardModule::new("wedding-checklist", "Wedding checklist", Medium, 7)
            .at(40.0, 1280.0, 3, 0)
            .sized(360.0, 940.0),
        DashboardModule::new("budget-tracking", "Budget", Medium, 8).at(440.0, 1280.0, 3, 1),
        DashboardModule::new("timeline-planning", "Timeline", Medium, 9)
            .at(840.0, 1280.0, 3, 2)
            .sized(360.0, 353.0),
        DashboardModule::new("marketplace", "Find vendors", Medium, 10).at(840.0, 2080.0, 4, 1),
        DashboardModule::new("moodboard", "Moodboard", Medium, 11).at(440.0, 320.0, 4, 2),
        DashboardModule::new("wedding-day-timeline", "Wedding day schedule", Small, 12)
            .at(440.0, 2080.0, 5, 0)
            .sized(360.0, 353.0),
        DashboardModule::new("food-drinks", "Food and drinks", Medium, 13)
            .at(40.0, 2080.0, 5, 1)
            .sized(360.0, 353.0),
        DashboardModule::new("music-playlist", "Wedding music", Medium, 14).at(440.0, 2480.0, 6, 0),
        DashboardModule::new("shopping-list", "Shopping list", Medium, 15).at(440.0, 1680.0, 6, 1),
        DashboardModule::new("accommodation-management", "Accommodation", Medium, 16)
            .at(40.0, 2480.0, 6, 2),
        DashboardModule::new("wedding-website", "Wedding website", Medium, 17).at(840.0, 2680.0, 7, 0),
    ]
}

/// Document shape for the dashboard.
pub fn dashboard_shape(demo_user: bool) -> ShapeDescriptor {
    let xy = ObjectShape::new(vec![
        FieldDef::required("x", FieldType::Number, json!(0)),
        FieldDef::required("y", FieldType::Number, json!(0)),
    ]);
    let size = ObjectShape::new(vec![
        FieldDef::required("width", FieldType::Number, json!(0)),
        FieldDef::required("height", FieldType::Number, json!(0)),
    ]);
    let grid = ObjectShape::new(vec![
        FieldDef::required("row", FieldType::Number, json!(0)),
        FieldDef::required("column", FieldType::Number, json!(0)),
    ]);
    let module = ObjectShape::new(vec![
        FieldDef::required("id", FieldType::String, json!("")),
        FieldDef::required("type", FieldType::String, json!("")),
        FieldDef::required("title", FieldType::String, json!("")),
        FieldDef::required("size", FieldType::String, json!("medium")),
        FieldDef::optional("position", FieldType::Object(xy)),
        FieldDef::optional("customSize", FieldType::Object(size)),
        FieldDef::optional("gridPosition", FieldType::Object(grid)),
        FieldDef::required("isVisible", FieldType::Bool, json!(true)),
        FieldDef::required("isLocked", FieldType::Bool, json!(false)),
        FieldDef::required("order", FieldType::Number, json!(0)),
    ]);

    let catalogue = DashboardLayout::defaults(demo_user)
        .modules
        .iter()
        .filter_map(|m| serde_json::to_value(m).ok())
        .collect();

    ShapeDescriptor::new(
        DASHBOARD_SHAPE_VERSION,
        vec![
            FieldDef::list("modules", ListShape::keyed("id", module, catalogue)),
            FieldDef::required("isEditMode", FieldType::Bool, json!(false)),
            FieldDef::required("isLocked", FieldType::Bool, json!(false)),
            FieldDef::optional("layoutMode", FieldType::String),
        ],
    )
}

/// Edits the dashboard layout of one wedding.
#[derive(Debug)]
pub struct DashboardEditor {
    engine: SyncEngine<DashboardLayout>,
    demo_user: bool,
}

impl DashboardEditor {
    /// Open the dashboard of `wedding_id` for `user_id`.
    pub fn open(ctx: &SyncContext, user_id: &str, wedding_id: &str, demo_user: bool) -> Result<Self> {
        let key = DocumentKey::new("dashboard", user_id, wedding_id);
        let engine = ctx.engine(key, DashboardLayout::defaults(demo_user), dashboard_shape(demo_user))?;
        Ok(Self { engine, demo_user })
    }

    pub fn engine(&self) -> &SyncEngine<DashboardLayout> {
        &self.engine
    }

    pub fn layout(&self) -> DashboardLayout {
        self.engine.current_state()
    }

    /// Reorder modules to follow `ordered_ids`; modules not listed keep
    /// their relative order after the listed ones. `order` is renumbered.
    pub fn update_module_order(&self, ordered_ids: &[&str]) -> Result<Revision> {
        self.engine.mutate(|layout| {
            let mut next = layout.clone();
            let rank = |m: &DashboardModule| {
                ordered_ids
                    .iter()
                    .position(|id| *id == m.id)
                    .unwrap_or(ordered_ids.len())
            };
            next.modules.sort_by_key(rank);
            renumber(&mut next.modules);
            next
        })
    }

    pub fn toggle_edit_mode(&self) -> Result<Revision> {
        self.engine.mutate(|layout| DashboardLayout {
            is_edit_mode: !layout.is_edit_mode,
            ..layout.clone()
        })
    }

    pub fn toggle_lock(&self) -> Result<Revision> {
        self.engine.mutate(|layout| DashboardLayout {
            is_locked: !layout.is_locked,
            ..layout.clone()
        })
    }

    pub fn set_layout_mode(&self, mode: LayoutMode) -> Result<Revision> {
        self.engine.mutate(|layout| DashboardLayout {
            layout_mode: Some(mode),
            ..layout.clone()
        })
    }

    pub fn toggle_module_visibility(&self, module_id: &str) -> Result<Revision> {
        self.update_module(module_id, |m| m.is_visible = !m.is_visible)
    }

    pub fn toggle_module_lock(&self, module_id: &str) -> Result<Revision> {
        self.update_module(module_id, |m| m.is_locked = !m.is_locked)
    }

    /// Back to the default modules, unlocked and out of edit mode.
    pub fn reset_layout(&self) -> Result<Revision> {
        let demo_user = self.demo_user;
        self.engine.mutate(|layout| DashboardLayout {
            layout_mode: layout.layout_mode,
            ..DashboardLayout::defaults(demo_user)
        })
    }

    /// Visible modules sorted by `order`.
    pub fn visible_modules(&self) -> Vec<DashboardModule> {
        let mut modules: Vec<DashboardModule> = self
            .layout()
            .modules
            .into_iter()
            .filter(|m| m.is_visible)
            .filter(|m| !(self.demo_user && AI_MODULES.contains(&m.id.as_str())))
            .collect();
        modules.sort_by_key(|m| m.order);
        modules
    }

    pub fn dispose(self) {
        self.engine.dispose();
    }

    fn update_module<F>(&self, module_id: &str, change: F) -> Result<Revision>
    where
        F: FnOnce(&mut DashboardModule),
    {
        self.engine.mutate(|layout| {
            let mut next = layout.clone();
            if let Some(module) = next.modules.iter_mut().find(|m| m.id == module_id) {
                change(module);
            }
            next
        })
    }
}

fn renumber(modules: &mut [DashboardModule]) {
    for (index, module) in modules.iter_mut().enumerate() {
        module.order = u32::try_from(index).unwrap_or(u32::MAX);
    }
}
