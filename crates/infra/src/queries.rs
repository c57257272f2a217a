//! Read-only query boundary used by choreography handlers.
//!
//! Answers come straight from the aggregate store's records; there is no
//! separate read model. Results are ordered deterministically so "the first
//! idle equipment" or "the first routing" is stable across runs.

use serde::de::DeserializeOwned;

use shopfloor_core::{AggregateId, AggregateKind, ProductId, WorkCenterId};
use shopfloor_equipment::{Equipment, EquipmentStatus};
use shopfloor_production::{Routing, RoutingId, WorkOrder, WorkOrderId};
use shopfloor_sales::{DeliverRecord, DeliverRecordId, OrderId};

use crate::store::{AggregateStore, StoreError};

pub trait ShopFloorQueries: Send + Sync {
    /// Whether an aggregate of `aggregate_type` with this id has been persisted.
    fn exists(&self, aggregate_type: &str, aggregate_id: AggregateId) -> Result<bool, StoreError>;

    fn work_order(&self, id: WorkOrderId) -> Result<Option<WorkOrder>, StoreError>;

    fn routing(&self, id: RoutingId) -> Result<Option<Routing>, StoreError>;

    /// Live (not deleted) routings of a product, ordered by routing number.
    fn find_routings_by_product(&self, product_id: ProductId) -> Result<Vec<Routing>, StoreError>;

    /// Idle equipment in a work center, ordered by equipment code.
    fn find_idle_equipment(&self, work_center_id: WorkCenterId)
    -> Result<Vec<Equipment>, StoreError>;

    /// Equipment currently attached to a work order, ordered by equipment code.
    fn find_equipment_by_work_order(
        &self,
        work_order_id: WorkOrderId,
    ) -> Result<Vec<Equipment>, StoreError>;

    fn find_deliver_record_by_order(
        &self,
        order_id: OrderId,
    ) -> Result<Option<DeliverRecord>, StoreError>;
}

/// [`ShopFloorQueries`] answered by scanning an [`AggregateStore`].
#[derive(Debug, Clone)]
pub struct StoreQueries<S> {
    store: S,
}

impl<S: AggregateStore> StoreQueries<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn load<A>(&self, aggregate_id: AggregateId) -> Result<Option<A>, StoreError>
    where
        A: AggregateKind + DeserializeOwned,
    {
        self.store
            .load(A::AGGREGATE_TYPE, aggregate_id)?
            .map(|record| record.to_aggregate())
            .transpose()
    }

    fn load_all<A>(&self) -> Result<Vec<A>, StoreError>
    where
        A: AggregateKind + DeserializeOwned,
    {
        self.store
            .list(A::AGGREGATE_TYPE)?
            .iter()
            .map(|record| record.to_aggregate())
            .collect()
    }

    fn equipment_where(
        &self,
        keep: impl Fn(&Equipment) -> bool,
    ) -> Result<Vec<Equipment>, StoreError> {
        let mut found: Vec<Equipment> = self
            .load_all::<Equipment>()?
            .into_iter()
            .filter(|e| keep(e))
            .collect();
        found.sort_by(|a, b| a.code().cmp(b.code()));
        Ok(found)
    }
}

impl<S: AggregateStore> ShopFloorQueries for StoreQueries<S> {
    fn exists(&self, aggregate_type: &str, aggregate_id: AggregateId) -> Result<bool, StoreError> {
        Ok(self.store.load(aggregate_type, aggregate_id)?.is_some())
    }

    fn work_order(&self, id: WorkOrderId) -> Result<Option<WorkOrder>, StoreError> {
        self.load(id.aggregate_id())
    }

    fn routing(&self, id: RoutingId) -> Result<Option<Routing>, StoreError> {
        self.load(id.aggregate_id())
    }

    fn find_routings_by_product(&self, product_id: ProductId) -> Result<Vec<Routing>, StoreError> {
        let mut routings: Vec<Routing> = self
            .load_all::<Routing>()?
            .into_iter()
            .filter(|r| !r.is_deleted() && r.product_id() == Some(product_id))
            .collect();
        routings.sort_by(|a, b| a.routing_number().cmp(b.routing_number()));
        Ok(routings)
    }

    fn find_idle_equipment(
        &self,
        work_center_id: WorkCenterId,
    ) -> Result<Vec<Equipment>, StoreError> {
        self.equipment_where(|e| {
            e.status() == EquipmentStatus::Idle && e.work_center_id() == Some(work_center_id)
        })
    }

    fn find_equipment_by_work_order(
        &self,
        work_order_id: WorkOrderId,
    ) -> Result<Vec<Equipment>, StoreError> {
        self.equipment_where(|e| e.current_work_order() == Some(work_order_id))
    }

    fn find_deliver_record_by_order(
        &self,
        order_id: OrderId,
    ) -> Result<Option<DeliverRecord>, StoreError> {
        // Fast path: records created by choreography live at the derived id.
        let derived = DeliverRecordId::for_order(order_id).aggregate_id();
        if let Some(record) = self.load::<DeliverRecord>(derived)? {
            return Ok(Some(record));
        }
        Ok(self
            .load_all::<DeliverRecord>()?
            .into_iter()
            .find(|r| r.order_id() == Some(order_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use shopfloor_core::{Aggregate, ExpectedVersion};
    use shopfloor_equipment::{
        AssignToWorkOrder, EquipmentCommand, EquipmentId, EquipmentKind, RegisterEquipment,
    };
    use shopfloor_production::{
        AddOperation, CreateRouting, DeleteRouting, RoutingCommand, RoutingOperation,
    };

    use crate::store::{AggregateRecord, InMemoryStore};

    fn save<A>(store: &InMemoryStore, id: AggregateId, aggregate: &A)
    where
        A: AggregateKind + serde::Serialize,
    {
        let record = AggregateRecord::from_aggregate(id, aggregate, Utc::now()).unwrap();
        store.save(record, ExpectedVersion::NotExists, vec![]).unwrap();
    }

    fn equipment(code: &str, work_center_id: WorkCenterId, running_on: Option<WorkOrderId>) -> Equipment {
        let id = EquipmentId::generate();
        let mut e = Equipment::empty(id);
        let events = e
            .handle(&EquipmentCommand::RegisterEquipment(RegisterEquipment {
                equipment_id: id,
                code: code.to_string(),
                name: format!("{code} press"),
                kind: EquipmentKind::Machine,
                work_center_id: Some(work_center_id),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        e.apply(&events[0]);
        if let Some(work_order_id) = running_on {
            let events = e
                .handle(&EquipmentCommand::AssignToWorkOrder(AssignToWorkOrder {
                    equipment_id: id,
                    work_order_id,
                    occurred_at: Utc::now(),
                }))
                .unwrap();
            e.apply(&events[0]);
        }
        e
    }

    fn routing(number: &str, product_id: ProductId, deleted: bool) -> Routing {
        let id = RoutingId::generate();
        let mut r = Routing::empty(id);
        let run = |cmd: RoutingCommand, r: &mut Routing| {
            for ev in r.handle(&cmd).unwrap() {
                r.apply(&ev);
            }
        };
        run(
            RoutingCommand::CreateRouting(CreateRouting {
                routing_id: id,
                routing_number: number.to_string(),
                name: "assembly".to_string(),
                product_id,
                occurred_at: Utc::now(),
            }),
            &mut r,
        );
        run(
            RoutingCommand::AddOperation(AddOperation {
                routing_id: id,
                operation: RoutingOperation {
                    sequence: 10,
                    name: "press".to_string(),
                    work_center_id: WorkCenterId::new(),
                    standard_minutes: 5,
                },
                occurred_at: Utc::now(),
            }),
            &mut r,
        );
        if deleted {
            run(
                RoutingCommand::DeleteRouting(DeleteRouting {
                    routing_id: id,
                    occurred_at: Utc::now(),
                }),
                &mut r,
            );
        }
        r
    }

    #[test]
    fn idle_equipment_is_filtered_by_work_center_and_ordered_by_code() {
        let store = Arc::new(InMemoryStore::new());
        let wc = WorkCenterId::new();
        for e in [
            equipment("EQ-2", wc, None),
            equipment("EQ-1", wc, None),
            equipment("EQ-0", wc, Some(WorkOrderId::generate())),
            equipment("EQ-9", WorkCenterId::new(), None),
        ] {
            save(&store, e.id_typed().aggregate_id(), &e);
        }

        let queries = StoreQueries::new(store);
        let idle: Vec<String> = queries
            .find_idle_equipment(wc)
            .unwrap()
            .iter()
            .map(|e| e.code().to_string())
            .collect();
        assert_eq!(idle, vec!["EQ-1", "EQ-2"]);
    }

    #[test]
    fn equipment_by_work_order_only_returns_attached_equipment() {
        let store = Arc::new(InMemoryStore::new());
        let wc = WorkCenterId::new();
        let wo = WorkOrderId::generate();
        for e in [equipment("EQ-1", wc, Some(wo)), equipment("EQ-2", wc, None)] {
            save(&store, e.id_typed().aggregate_id(), &e);
        }

        let queries = StoreQueries::new(store);
        let attached = queries.find_equipment_by_work_order(wo).unwrap();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].code(), "EQ-1");
        assert!(
            queries
                .find_equipment_by_work_order(WorkOrderId::generate())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn deleted_routings_are_invisible() {
        let store = Arc::new(InMemoryStore::new());
        let product = ProductId::new();
        for r in [
            routing("RT-2", product, false),
            routing("RT-1", product, true),
            routing("RT-3", ProductId::new(), false),
        ] {
            save(&store, r.id_typed().aggregate_id(), &r);
        }

        let queries = StoreQueries::new(store);
        let found = queries.find_routings_by_product(product).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].routing_number(), "RT-2");
    }
}
