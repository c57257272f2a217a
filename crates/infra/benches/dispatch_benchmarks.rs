use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use shopfloor_core::{ProductId, WorkCenterId};
use shopfloor_equipment::{EquipmentCommand, EquipmentId, EquipmentKind, RegisterEquipment};
use shopfloor_events::{DomainEventBus, EventEnvelope, InMemoryBroker};
use shopfloor_infra::build_event_bus;
use shopfloor_infra::command_dispatcher::{CommandDispatcher, ShopFloorCommand};
use shopfloor_infra::outbox::{OutboxPublisherConfig, publish_pending};
use shopfloor_infra::store::InMemoryStore;
use shopfloor_production::{
    AddOperation, ApproveProductionPlan, CreateProductionPlan, CreateRouting, ProductionPlanCommand,
    ProductionPlanId, ReportProgress, RoutingCommand, RoutingId, RoutingOperation,
    StartProductionPlan, StartWorkOrder, WorkOrderCommand, WorkOrderId,
};
use shopfloor_sales::{CreateOrder, OrderCommand, OrderId, PayOrder};

type Dispatcher = CommandDispatcher<Arc<InMemoryStore>>;

fn dispatch(d: &Dispatcher, command: impl Into<ShopFloorCommand>) {
    d.dispatch(command.into()).unwrap();
}

fn create_plan(d: &Dispatcher, product_id: ProductId, quantity: u32) -> ProductionPlanId {
    let plan_id = ProductionPlanId::generate();
    let now = Utc::now();
    dispatch(
        d,
        ProductionPlanCommand::CreateProductionPlan(CreateProductionPlan {
            plan_id,
            plan_number: format!("PP-{plan_id}"),
            product_id,
            quantity,
            planned_start: now,
            planned_end: now + chrono::Duration::days(1),
            occurred_at: now,
        }),
    );
    plan_id
}

fn pay_new_order(d: &Dispatcher) {
    let order_id = OrderId::generate();
    dispatch(
        d,
        OrderCommand::CreateOrder(CreateOrder {
            order_id,
            name: black_box("bench order".to_string()),
            count: 5,
            occurred_at: Utc::now(),
        }),
    );
    dispatch(
        d,
        OrderCommand::PayOrder(PayOrder {
            order_id,
            occurred_at: Utc::now(),
        }),
    );
}

/// Shop floor with one routed product and one idle machine in its work center.
fn routed_shop_floor() -> (Dispatcher, ProductId) {
    let d = CommandDispatcher::new(Arc::new(InMemoryStore::new()), build_event_bus());
    let product_id = ProductId::new();
    let work_center_id = WorkCenterId::new();
    let routing_id = RoutingId::generate();

    dispatch(
        &d,
        RoutingCommand::CreateRouting(CreateRouting {
            routing_id,
            routing_number: "RT-1".to_string(),
            name: "assembly".to_string(),
            product_id,
            occurred_at: Utc::now(),
        }),
    );
    dispatch(
        &d,
        RoutingCommand::AddOperation(AddOperation {
            routing_id,
            operation: RoutingOperation {
                sequence: 10,
                name: "press".to_string(),
                work_center_id,
                standard_minutes: 5,
            },
            occurred_at: Utc::now(),
        }),
    );
    dispatch(
        &d,
        EquipmentCommand::RegisterEquipment(RegisterEquipment {
            equipment_id: EquipmentId::generate(),
            code: "EQ-1".to_string(),
            name: "press".to_string(),
            kind: EquipmentKind::Machine,
            work_center_id: Some(work_center_id),
            occurred_at: Utc::now(),
        }),
    );
    (d, product_id)
}

fn bench_command_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_round_trip");
    group.sample_size(500);

    // Creation: load miss, decide, save.
    group.bench_function("create_plan", |b| {
        let d = CommandDispatcher::new(Arc::new(InMemoryStore::new()), DomainEventBus::empty());
        let product_id = ProductId::new();
        b.iter(|| create_plan(&d, product_id, black_box(150)));
    });

    // Transition on an existing aggregate.
    group.bench_function("approve_plan", |b| {
        let d = CommandDispatcher::new(Arc::new(InMemoryStore::new()), DomainEventBus::empty());
        let product_id = ProductId::new();
        b.iter_batched(
            || create_plan(&d, product_id, 150),
            |plan_id| {
                dispatch(
                    &d,
                    ProductionPlanCommand::ApproveProductionPlan(ApproveProductionPlan {
                        plan_id,
                        occurred_at: Utc::now(),
                    }),
                )
            },
            BatchSize::SmallInput,
        );
    });

    // Create + pay: the second command also writes an outbox row.
    group.bench_function("create_and_pay_order", |b| {
        let d = CommandDispatcher::new(Arc::new(InMemoryStore::new()), DomainEventBus::empty());
        b.iter(|| pay_new_order(&d));
    });

    group.finish();
}

fn bench_choreography_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("choreography_chain");
    group.sample_size(200);

    // Start → work order → inspection.
    group.bench_function("start_plan", |b| {
        let (d, product_id) = routed_shop_floor();
        b.iter_batched(
            || {
                let plan_id = create_plan(&d, product_id, 150);
                dispatch(
                    &d,
                    ProductionPlanCommand::ApproveProductionPlan(ApproveProductionPlan {
                        plan_id,
                        occurred_at: Utc::now(),
                    }),
                );
                plan_id
            },
            |plan_id| {
                dispatch(
                    &d,
                    ProductionPlanCommand::StartProductionPlan(StartProductionPlan {
                        plan_id,
                        occurred_at: Utc::now(),
                    }),
                )
            },
            BatchSize::SmallInput,
        );
    });

    // Plan start through equipment release: every rule fires once.
    group.bench_function("plan_to_completed_work_order", |b| {
        let (d, product_id) = routed_shop_floor();
        b.iter(|| {
            let plan_id = create_plan(&d, product_id, 150);
            let work_order_id = WorkOrderId::for_plan(plan_id);
            dispatch(
                &d,
                ProductionPlanCommand::ApproveProductionPlan(ApproveProductionPlan {
                    plan_id,
                    occurred_at: Utc::now(),
                }),
            );
            dispatch(
                &d,
                ProductionPlanCommand::StartProductionPlan(StartProductionPlan {
                    plan_id,
                    occurred_at: Utc::now(),
                }),
            );
            dispatch(
                &d,
                WorkOrderCommand::StartWorkOrder(StartWorkOrder {
                    work_order_id,
                    occurred_at: Utc::now(),
                }),
            );
            dispatch(
                &d,
                WorkOrderCommand::ReportProgress(ReportProgress {
                    work_order_id,
                    quantity: black_box(150),
                    occurred_at: Utc::now(),
                }),
            );
        });
    });

    group.finish();
}

fn bench_outbox_publish_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox_publish_throughput");
    group.sample_size(50);

    for rows in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            let config = OutboxPublisherConfig::new().with_batch_size(rows);
            b.iter_batched(
                || {
                    let d = CommandDispatcher::new(Arc::new(InMemoryStore::new()), DomainEventBus::empty());
                    for _ in 0..rows {
                        pay_new_order(&d);
                    }
                    (d, InMemoryBroker::<EventEnvelope<JsonValue>>::new())
                },
                |(d, broker)| {
                    let pass = publish_pending(d.store(), &broker, &config, Utc::now()).unwrap();
                    assert_eq!(pass.published, rows);
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_round_trip,
    bench_choreography_chain,
    bench_outbox_publish_throughput
);
criterion_main!(benches);
