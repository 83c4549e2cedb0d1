use pump11_core::config::{ConnectionSettings, PumpConfig};
use pump11_core::demo::SimulatedPump;
use pump11_core::protocol::{Channel, ChannelRegistry, ErrorCategory, MotionStatus};
use pump11_core::pump::{BudgetedPump, PumpSession, RunOutcome};
use pump11_core::units::{Quantity, SiUnits};

fn session_on(pump: &SimulatedPump, registry: &ChannelRegistry) -> PumpSession {
    let config = PumpConfig::new(ConnectionSettings::new("COM7"), "14.43 mm", "10 ml")
        .with_address(pump.address());
    let mut session = PumpSession::new(registry, config).unwrap();
    session.initialize().unwrap();
    session
}

fn registry_for(pump: &SimulatedPump) -> ChannelRegistry {
    let link = pump.link();
    ChannelRegistry::with_opener(move |settings| {
        Ok(Channel::new(settings.port.clone(), Box::new(link.clone())))
    })
}

#[test]
fn test_dose_and_refill() {
    let pump = SimulatedPump::new(2);
    let registry = registry_for(&pump);
    let session = session_on(&pump, &registry);

    let mut budgeted = BudgetedPump::new(
        session,
        &Quantity::volume(10.0),
        &Quantity::new(2000.0, "ul"),
        &SiUnits,
    )
    .unwrap();
    assert_eq!(budgeted.budget().stored_volume, 2.0);

    assert_eq!(budgeted.infuse(1.5).unwrap(), RunOutcome::Started);
    assert_eq!(pump.target_ml(), Some(1.5));
    assert_eq!(pump.status(), MotionStatus::Infusing);
    assert_eq!(budgeted.budget().stored_volume, 0.5);

    pump.finish_motion();
    assert_eq!(budgeted.session().status().unwrap(), MotionStatus::TargetReached);

    assert_eq!(budgeted.withdraw(5.0).unwrap(), RunOutcome::Started);
    assert_eq!(pump.status(), MotionStatus::Withdrawing);
    assert_eq!(budgeted.budget().stored_volume, 5.5);
}

#[test]
fn test_budget_refusal_sends_nothing() {
    let pump = SimulatedPump::new(0);
    let link = pump.link();
    let registry = ChannelRegistry::with_opener({
        let link = link.clone();
        move |settings| Ok(Channel::new(settings.port.clone(), Box::new(link.clone())))
    });
    let session = session_on(&pump, &registry);
    let mut budgeted =
        BudgetedPump::new(session, &Quantity::volume(10.0), &Quantity::volume(1.0), &SiUnits)
            .unwrap();

    let before = link.write_count();
    let err = budgeted.infuse(2.0).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Capability);
    let err = budgeted.withdraw(9.5).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Capability);
    assert_eq!(link.write_count(), before);
}

#[test]
fn test_zero_dose_sends_nothing() {
    let pump = SimulatedPump::new(0);
    let link = pump.link();
    let registry = ChannelRegistry::with_opener({
        let link = link.clone();
        move |settings| Ok(Channel::new(settings.port.clone(), Box::new(link.clone())))
    });
    let session = session_on(&pump, &registry);
    let mut budgeted =
        BudgetedPump::new(session, &Quantity::volume(10.0), &Quantity::volume(5.0), &SiUnits)
            .unwrap();

    let before = link.write_count();
    for err in [budgeted.infuse(0.0).unwrap_err(), budgeted.withdraw(0.0).unwrap_err()] {
        assert_eq!(err.category(), ErrorCategory::Capability);
    }
    assert_eq!(link.write_count(), before);
    assert_eq!(pump.status(), MotionStatus::Idle);
    assert_eq!(budgeted.budget().stored_volume, 5.0);
}

#[test]
fn test_failed_start_clears_target() {
    let pump = SimulatedPump::infuse_only(0);
    let registry = registry_for(&pump);
    let session = session_on(&pump, &registry);
    let mut budgeted =
        BudgetedPump::new(session, &Quantity::volume(10.0), &Quantity::volume(1.0), &SiUnits)
            .unwrap();

    let err = budgeted.withdraw(2.0).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Capability);
    assert_eq!(pump.target_ml(), None);
    assert_eq!(budgeted.session().state().target_volume, None);
    assert_eq!(pump.status(), MotionStatus::Idle);
    assert_eq!(budgeted.budget().stored_volume, 1.0);
}

#[test]
fn test_already_moving_keeps_budget() {
    let pump = SimulatedPump::new(0);
    let registry = registry_for(&pump);
    let session = session_on(&pump, &registry);
    session.infuse_run().unwrap();

    let mut budgeted =
        BudgetedPump::new(session, &Quantity::volume(10.0), &Quantity::volume(5.0), &SiUnits)
            .unwrap();
    assert_eq!(budgeted.infuse(1.0).unwrap(), RunOutcome::AlreadyMoving);
    assert_eq!(budgeted.budget().stored_volume, 5.0);
}

#[test]
fn test_stored_volume_must_fit() {
    let pump = SimulatedPump::new(0);
    let registry = registry_for(&pump);
    let session = session_on(&pump, &registry);

    let result =
        BudgetedPump::new(session, &Quantity::volume(10.0), &Quantity::volume(12.0), &SiUnits);
    assert!(matches!(
        result.map(|_| ()).unwrap_err().category(),
        ErrorCategory::Configuration
    ));
}

#[test]
fn test_infuse_only_cannot_withdraw() {
    let pump = SimulatedPump::infuse_only(0);
    let registry = registry_for(&pump);
    let session = session_on(&pump, &registry);

    for result in [
        session.withdraw_run().map(|_| ()),
        session.get_withdrawing_rate().map(|_| ()),
        session.get_withdrawn_volume().map(|_| ()),
        session.clear_withdrawn_volume(),
        session.clear_infused_withdrawn_volume(),
        session.get_withdraw_ramp().map(|_| ()),
    ] {
        assert_eq!(result.unwrap_err().category(), ErrorCategory::Capability);
    }

    // Infuse side keeps working
    session.clear_infused_volume().unwrap();
    assert_eq!(session.infuse_run().unwrap(), RunOutcome::Started);
}
