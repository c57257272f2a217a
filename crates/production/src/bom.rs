use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfloor_core::{
    Aggregate, AggregateId, AggregateKind, AggregateRoot, DomainError, DomainResult, MaterialId,
    ProductId, aggregate_id_newtype, require_positive, require_text,
};
use shopfloor_events::{Command, Event};

aggregate_id_newtype!(
    /// Bill of materials identifier.
    BomId
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomItem {
    pub material_id: MaterialId,
    pub quantity: f64,
    pub unit: String,
}

impl BomItem {
    fn validate(&self) -> DomainResult<()> {
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(DomainError::validation(
                "item quantity must be a positive number",
            ));
        }
        require_text("unit", &self.unit)
    }
}

/// Aggregate root: Bom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bom {
    id: BomId,
    bom_number: String,
    product_id: Option<ProductId>,
    bom_version: u32,
    active: bool,
    items: Vec<BomItem>,
    version: u64,
    created: bool,
}

impl Bom {
    pub fn empty(id: BomId) -> Self {
        Self {
            id,
            bom_number: String::new(),
            product_id: None,
            bom_version: 0,
            active: false,
            items: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> BomId {
        self.id
    }

    pub fn bom_number(&self) -> &str {
        &self.bom_number
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    /// Business revision of the BOM (not the aggregate version).
    pub fn bom_version(&self) -> u32 {
        self.bom_version
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn items(&self) -> &[BomItem] {
        &self.items
    }

    fn has_material(&self, material_id: MaterialId) -> bool {
        self.items.iter().any(|item| item.material_id == material_id)
    }
}

impl AggregateRoot for Bom {
    type Id = BomId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl AggregateKind for Bom {
    const AGGREGATE_TYPE: &'static str = "production.bom";

    fn empty(id: AggregateId) -> Self {
        Bom::empty(BomId::new(id))
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.bom_number.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBom {
    pub bom_id: BomId,
    pub bom_number: String,
    pub product_id: ProductId,
    pub bom_version: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddBomItem {
    pub bom_id: BomId,
    pub item: BomItem,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveBomItem {
    pub bom_id: BomId,
    pub material_id: MaterialId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivateBom {
    pub bom_id: BomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeactivateBom {
    pub bom_id: BomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BomCommand {
    CreateBom(CreateBom),
    AddBomItem(AddBomItem),
    RemoveBomItem(RemoveBomItem),
    ActivateBom(ActivateBom),
    DeactivateBom(DeactivateBom),
}

impl Command for BomCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let bom_id = match self {
            BomCommand::CreateBom(c) => c.bom_id,
            BomCommand::AddBomItem(c) => c.bom_id,
            BomCommand::RemoveBomItem(c) => c.bom_id,
            BomCommand::ActivateBom(c) => c.bom_id,
            BomCommand::DeactivateBom(c) => c.bom_id,
        };
        bom_id.0
    }

    fn validate(&self) -> DomainResult<()> {
        match self {
            BomCommand::CreateBom(c) => {
                require_text("bom_number", &c.bom_number)?;
                require_positive("bom_version", c.bom_version)
            }
            BomCommand::AddBomItem(c) => c.item.validate(),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomCreated {
    pub bom_id: BomId,
    pub bom_number: String,
    pub product_id: ProductId,
    pub bom_version: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomItemAdded {
    pub bom_id: BomId,
    pub item: BomItem,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomItemRemoved {
    pub bom_id: BomId,
    pub material_id: MaterialId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomActivated {
    pub bom_id: BomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomDeactivated {
    pub bom_id: BomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BomEvent {
    BomCreated(BomCreated),
    BomItemAdded(BomItemAdded),
    BomItemRemoved(BomItemRemoved),
    BomActivated(BomActivated),
    BomDeactivated(BomDeactivated),
}

impl BomEvent {
    pub const CREATED: &'static str = "production.bom.created";
    pub const ITEM_ADDED: &'static str = "production.bom.item_added";
    pub const ITEM_REMOVED: &'static str = "production.bom.item_removed";
    pub const ACTIVATED: &'static str = "production.bom.activated";
    pub const DEACTIVATED: &'static str = "production.bom.deactivated";
}

impl Event for BomEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BomEvent::BomCreated(_) => Self::CREATED,
            BomEvent::BomItemAdded(_) => Self::ITEM_ADDED,
            BomEvent::BomItemRemoved(_) => Self::ITEM_REMOVED,
            BomEvent::BomActivated(_) => Self::ACTIVATED,
            BomEvent::BomDeactivated(_) => Self::DEACTIVATED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BomEvent::BomCreated(e) => e.occurred_at,
            BomEvent::BomItemAdded(e) => e.occurred_at,
            BomEvent::BomItemRemoved(e) => e.occurred_at,
            BomEvent::BomActivated(e) => e.occurred_at,
            BomEvent::BomDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Bom {
    type Command = BomCommand;
    type Event = BomEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BomEvent::BomCreated(e) => {
                self.id = e.bom_id;
                self.bom_number = e.bom_number.clone();
                self.product_id = Some(e.product_id);
                self.bom_version = e.bom_version;
                self.active = true;
                self.created = true;
            }
            BomEvent::BomItemAdded(e) => {
                self.items.push(e.item.clone());
            }
            BomEvent::BomItemRemoved(e) => {
                self.items.retain(|item| item.material_id != e.material_id);
            }
            BomEvent::BomActivated(_) => {
                self.active = true;
            }
            BomEvent::BomDeactivated(_) => {
                self.active = false;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !matches!(command, BomCommand::CreateBom(_)) && !self.created {
            return Err(DomainError::not_found());
        }

        match command {
            BomCommand::CreateBom(cmd) => self.handle_create(cmd),
            BomCommand::AddBomItem(cmd) => self.handle_add_item(cmd),
            BomCommand::RemoveBomItem(cmd) => self.handle_remove_item(cmd),
            BomCommand::ActivateBom(cmd) => {
                if self.active {
                    return Err(DomainError::state_conflict("bom is already active"));
                }
                Ok(vec![BomEvent::BomActivated(BomActivated {
                    bom_id: self.id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            BomCommand::DeactivateBom(cmd) => {
                if !self.active {
                    return Err(DomainError::state_conflict("bom is already inactive"));
                }
                Ok(vec![BomEvent::BomDeactivated(BomDeactivated {
                    bom_id: self.id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl Bom {
    fn handle_create(&self, cmd: &CreateBom) -> DomainResult<Vec<BomEvent>> {
        require_text("bom_number", &cmd.bom_number)?;
        require_positive("bom_version", cmd.bom_version)?;
        if self.created {
            return Err(DomainError::state_conflict("bom already exists"));
        }

        Ok(vec![BomEvent::BomCreated(BomCreated {
            bom_id: cmd.bom_id,
            bom_number: cmd.bom_number.clone(),
            product_id: cmd.product_id,
            bom_version: cmd.bom_version,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddBomItem) -> DomainResult<Vec<BomEvent>> {
        cmd.item.validate()?;
        if self.has_material(cmd.item.material_id) {
            return Err(DomainError::state_conflict(format!(
                "material {} is already on the bom",
                cmd.item.material_id
            )));
        }

        Ok(vec![BomEvent::BomItemAdded(BomItemAdded {
            bom_id: self.id,
            item: cmd.item.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveBomItem) -> DomainResult<Vec<BomEvent>> {
        if !self.has_material(cmd.material_id) {
            return Err(DomainError::state_conflict(format!(
                "material {} is not on the bom",
                cmd.material_id
            )));
        }

        Ok(vec![BomEvent::BomItemRemoved(BomItemRemoved {
            bom_id: self.id,
            material_id: cmd.material_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopfloor_core::Tracked;

    fn created_bom() -> Tracked<Bom> {
        let bom_id = BomId::generate();
        let mut tracked = Tracked::new(Bom::empty(bom_id));
        tracked
            .execute(&BomCommand::CreateBom(CreateBom {
                bom_id,
                bom_number: "BOM-001".to_string(),
                product_id: ProductId::new(),
                bom_version: 1,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        tracked
    }

    fn add_item(bom: &Bom, material_id: MaterialId, quantity: f64) -> BomCommand {
        BomCommand::AddBomItem(AddBomItem {
            bom_id: bom.id_typed(),
            item: BomItem {
                material_id,
                quantity,
                unit: "kg".to_string(),
            },
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn new_bom_is_active() {
        let tracked = created_bom();
        assert!(tracked.aggregate().is_active());
        assert_eq!(tracked.aggregate().bom_version(), 1);
    }

    #[test]
    fn duplicate_material_is_rejected() {
        let mut tracked = created_bom();
        let material = MaterialId::new();
        let cmd = add_item(tracked.aggregate(), material, 2.5);
        tracked.execute(&cmd).unwrap();

        let err = tracked.execute(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
        assert_eq!(tracked.aggregate().items().len(), 1);
    }

    #[test]
    fn remove_unknown_material_is_rejected() {
        let mut tracked = created_bom();
        let cmd = BomCommand::RemoveBomItem(RemoveBomItem {
            bom_id: tracked.aggregate().id_typed(),
            material_id: MaterialId::new(),
            occurred_at: Utc::now(),
        });
        assert!(matches!(
            tracked.execute(&cmd),
            Err(DomainError::StateConflict(_))
        ));
    }

    #[test]
    fn item_quantity_must_be_positive_and_finite() {
        let tracked = created_bom();
        for quantity in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let cmd = add_item(tracked.aggregate(), MaterialId::new(), quantity);
            assert!(matches!(cmd.validate(), Err(DomainError::Validation(_))));
        }
    }

    #[test]
    fn activation_rejects_no_op_transitions() {
        let mut tracked = created_bom();
        let bom_id = tracked.aggregate().id_typed();
        let activate = BomCommand::ActivateBom(ActivateBom {
            bom_id,
            occurred_at: Utc::now(),
        });
        let deactivate = BomCommand::DeactivateBom(DeactivateBom {
            bom_id,
            occurred_at: Utc::now(),
        });

        assert!(tracked.execute(&activate).is_err());
        tracked.execute(&deactivate).unwrap();
        assert!(!tracked.aggregate().is_active());
        assert!(tracked.execute(&deactivate).is_err());
        tracked.execute(&activate).unwrap();
        assert!(tracked.aggregate().is_active());
    }
}
