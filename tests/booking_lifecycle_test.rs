mod common;

use common::{Harness, PAYMENT_SECRET, RejectingWrites, WEBHOOK_SECRET, captured, verify_request};
use marketplace_ledger::config::PolicyConfig;
use marketplace_ledger::domain::Transition;
use marketplace_ledger::domain::booking::{BookingStatus, PaymentStatus};
use marketplace_ledger::domain::event::AuditOutcome;
use marketplace_ledger::domain::money::MinorUnits;
use marketplace_ledger::domain::ports::{BookingStore, CatalogStore, CustomerStore, CustomerStoreRef};
use marketplace_ledger::domain::pricing::Customer;
use marketplace_ledger::error::MarketplaceError;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_full_lifecycle_to_completion() {
    let h = Harness::new().await;
    let technician = Uuid::new_v4();

    let receipt = h.book().await;
    assert_eq!(receipt.booking.status, BookingStatus::Pending);
    assert_eq!(receipt.order.amount, MinorUnits(50_000));

    let request = verify_request(&receipt.order.id, "pay_1", &h.customer_id.to_string());
    assert_eq!(
        h.verifier().verify_initial(&request).await.unwrap(),
        Transition::Applied
    );

    let booking_id = receipt.booking.id;
    h.engine.bookings.assign(booking_id, technician).await.unwrap();
    h.engine.bookings.accept(booking_id, technician).await.unwrap();
    h.engine.bookings.start(booking_id, technician).await.unwrap();

    let order = h
        .engine
        .bookings
        .request_final_payment(booking_id, technician, dec!(1250.50))
        .await
        .unwrap();
    assert_eq!(order.amount, MinorUnits(125_050));

    let (body, header) = common::signed_body(&captured(&order.id, "pay_2", 125_050));
    let ack = h.ingress().handle(&body, &header).await.unwrap();
    assert_eq!(ack.outcome, AuditOutcome::Applied);

    let booking = h.booking(booking_id).await;
    assert_eq!(booking.status, BookingStatus::Completed);
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
    assert_eq!(booking.final_payment_id.as_deref(), Some("pay_2"));
    assert_eq!(booking.payment_id.as_deref(), Some("pay_1"));
    assert_eq!(booking.employee_id, Some(technician));
    assert!(booking.is_done);

    let templates: Vec<&str> = h
        .notifier
        .sent()
        .await
        .iter()
        .map(|n| n.template())
        .collect();
    assert_eq!(
        templates,
        vec![
            "booking_confirmed",
            "technician_proposed",
            "assignment_accepted",
            "final_payment_requested",
            "service_completed",
        ]
    );
}

#[tokio::test]
async fn test_assign_requires_confirmed_booking() {
    let h = Harness::new().await;
    let receipt = h.book().await;

    let result = h.engine.bookings.assign(receipt.booking.id, Uuid::new_v4()).await;
    assert!(matches!(
        result,
        Err(MarketplaceError::IllegalTransition {
            from: BookingStatus::Pending,
            ..
        })
    ));
}

#[tokio::test]
async fn test_accept_without_schedule() {
    let h = Harness::new().await;
    let booking = h.confirmed_booking("pay_1").await;

    let result = h.engine.bookings.accept(booking.id, Uuid::new_v4()).await;
    assert!(matches!(result, Err(MarketplaceError::ScheduleNotFound(id)) if id == booking.id));
}

#[tokio::test]
async fn test_reassignment_replaces_proposal() {
    let h = Harness::new().await;
    let booking = h.confirmed_booking("pay_1").await;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    h.engine.bookings.assign(booking.id, first).await.unwrap();
    h.engine.bookings.assign(booking.id, second).await.unwrap();

    // Only the latest proposal can be accepted.
    assert!(matches!(
        h.engine.bookings.accept(booking.id, first).await,
        Err(MarketplaceError::ValidationError(_))
    ));
    assert_eq!(
        h.engine.bookings.accept(booking.id, second).await.unwrap(),
        Transition::Applied
    );
    assert_eq!(
        h.engine.bookings.accept(booking.id, second).await.unwrap(),
        Transition::AlreadyTerminal
    );
}

#[tokio::test]
async fn test_only_assigned_technician_drives_work() {
    let h = Harness::new().await;
    let technician = Uuid::new_v4();
    let booking = h.confirmed_booking("pay_1").await;
    h.engine.bookings.assign(booking.id, technician).await.unwrap();
    h.engine.bookings.accept(booking.id, technician).await.unwrap();

    let stranger = Uuid::new_v4();
    assert!(matches!(
        h.engine.bookings.start(booking.id, stranger).await,
        Err(MarketplaceError::ValidationError(_))
    ));
    h.engine.bookings.start(booking.id, technician).await.unwrap();
    assert!(matches!(
        h.engine
            .bookings
            .request_final_payment(booking.id, stranger, dec!(100))
            .await,
        Err(MarketplaceError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_final_amount_must_be_positive() {
    let h = Harness::new().await;
    let technician = Uuid::new_v4();
    let booking = h.started_booking(technician).await;

    let result = h
        .engine
        .bookings
        .request_final_payment(booking.id, technician, dec!(0))
        .await;
    assert!(matches!(result, Err(MarketplaceError::ValidationError(_))));
    assert_eq!(h.booking(booking.id).await.service_amount, None);
}

#[tokio::test]
async fn test_request_final_before_start_is_illegal() {
    let h = Harness::new().await;
    let technician = Uuid::new_v4();
    let booking = h.confirmed_booking("pay_1").await;
    h.engine.bookings.assign(booking.id, technician).await.unwrap();
    h.engine.bookings.accept(booking.id, technician).await.unwrap();

    let result = h
        .engine
        .bookings
        .request_final_payment(booking.id, technician, dec!(300))
        .await;
    assert!(matches!(
        result,
        Err(MarketplaceError::IllegalTransition {
            from: BookingStatus::InProgress,
            ..
        })
    ));
    // No final order was opened.
    assert_eq!(h.gateway.orders().await.len(), 1);
}

#[tokio::test]
async fn test_missing_fee_schedule() {
    let h = Harness::with_policy(PolicyConfig::new(PAYMENT_SECRET, WEBHOOK_SECRET)).await;

    let result = h.engine.bookings.create(h.customer_id, h.category.id).await;
    assert!(matches!(result, Err(MarketplaceError::PricingUnavailable)));
    assert!(h.bookings.get_all().await.unwrap().is_empty());
    assert!(h.gateway.orders().await.is_empty());
}

#[tokio::test]
async fn test_fee_change_applies_to_next_booking() {
    let h = Harness::new().await;
    let first = h.book().await;

    let mut fees = common::fees();
    fees.booking_fee = marketplace_ledger::domain::money::Amount::new(dec!(650)).unwrap();
    h.catalog.set_fees(fees).await.unwrap();
    let second = h.book().await;

    assert_eq!(first.order.amount, MinorUnits(50_000));
    assert_eq!(second.order.amount, MinorUnits(65_000));
}

#[tokio::test]
async fn test_gateway_failure_persists_nothing() {
    let h = Harness::new().await;
    h.gateway.fail_orders(true);

    let result = h.engine.bookings.create(h.customer_id, h.category.id).await;
    assert!(matches!(result, Err(MarketplaceError::GatewayError(_))));
    assert!(h.bookings.get_all().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_gateway_timeout_persists_nothing() {
    let policy = PolicyConfig::new(PAYMENT_SECRET, WEBHOOK_SECRET)
        .with_gateway_timeout(Duration::from_secs(2));
    let h = Harness::with_policy(policy).await;
    h.catalog.set_fees(common::fees()).await.unwrap();
    h.gateway.set_latency(Some(Duration::from_secs(30))).await;

    let result = h.engine.bookings.create(h.customer_id, h.category.id).await;
    assert!(matches!(result, Err(MarketplaceError::GatewayTimeout)));
    assert!(h.bookings.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fine_surcharge_settled_with_booking_fee() {
    let h = Harness::new().await;
    h.customers
        .store(Customer {
            id: h.customer_id,
            fine_imposed: true,
        })
        .await
        .unwrap();

    let receipt = h.book().await;
    assert!(receipt.booking.fine_applied);
    assert_eq!(receipt.order.amount, MinorUnits(60_000));

    // An unpaid booking leaves the fine outstanding.
    let customer = h.customers.get(h.customer_id).await.unwrap().unwrap();
    assert!(customer.fine_imposed);

    let request = verify_request(&receipt.order.id, "pay_1", &h.customer_id.to_string());
    h.verifier().verify_initial(&request).await.unwrap();

    let customer = h.customers.get(h.customer_id).await.unwrap().unwrap();
    assert!(!customer.fine_imposed);
    assert!(!h.book().await.booking.fine_applied);
}

#[tokio::test]
async fn test_confirmation_survives_unwritable_customer_record() {
    let h = Harness::with_customer_store(|s| Arc::new(RejectingWrites(s)) as CustomerStoreRef).await;
    h.customers
        .store(Customer {
            id: h.customer_id,
            fine_imposed: true,
        })
        .await
        .unwrap();

    let receipt = h.book().await;
    assert!(receipt.booking.fine_applied);
    let request = verify_request(&receipt.order.id, "pay_1", &h.customer_id.to_string());
    assert_eq!(
        h.verifier().verify_initial(&request).await.unwrap(),
        Transition::Applied
    );
    assert_eq!(h.notifier.count("booking_confirmed").await, 1);

    // The fine stays on record and is flagged for follow-up.
    let customer = h.customers.get(h.customer_id).await.unwrap().unwrap();
    assert!(customer.fine_imposed);
    let entries = h.audit.entries().await;
    assert!(entries.iter().any(|e| e.event == "fine.clear"
        && e.outcome == AuditOutcome::Anomaly
        && e.reference.as_deref() == Some(h.customer_id.to_string().as_str())));

    assert_eq!(
        h.verifier().verify_initial(&request).await.unwrap(),
        Transition::AlreadyTerminal
    );
    assert_eq!(h.notifier.count("booking_confirmed").await, 1);
}

#[tokio::test]
async fn test_failed_initial_payment_can_be_retried() {
    let h = Harness::new().await;
    let receipt = h.book().await;

    h.deliver(&common::failed(&receipt.order.id, "pay_1", 50_000)).await;
    let booking = h.booking(receipt.booking.id).await;
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.initial_payment_status, PaymentStatus::Failed);

    h.deliver(&captured(&receipt.order.id, "pay_2", 50_000)).await;
    let booking = h.booking(receipt.booking.id).await;
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.payment_id.as_deref(), Some("pay_2"));
}

#[tokio::test]
async fn test_verify_rejects_other_customer() {
    let h = Harness::new().await;
    let receipt = h.book().await;

    let request = verify_request(&receipt.order.id, "pay_1", &Uuid::new_v4().to_string());
    assert!(matches!(
        h.verifier().verify_initial(&request).await,
        Err(MarketplaceError::ValidationError(_))
    ));
    assert_eq!(h.booking(receipt.booking.id).await.status, BookingStatus::Pending);
}
