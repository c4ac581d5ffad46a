//! Treasury (PCV) and redemption integration tests.
//!
//! Exercises reserve deposits into protocol-owned liquidity, liquidity
//! unwinding with the stablecoin side burned, controller-gated withdrawals,
//! the stablecoin-to-governance redemption unit, and the pause matrix.

use keel_core::core::{Component, Role};
use keel_core::types::Bps;
use keel_core::{
    AccountId, DepositId, KeelError, Protocol, ProtocolParams, TokenId, WAD,
};

// =============================================================================
// Fixtures
// =============================================================================

fn gov() -> AccountId {
    AccountId::named("governor")
}

fn controller() -> AccountId {
    AccountId::named("controller")
}

fn launched_protocol() -> Protocol {
    let params = ProtocolParams::builder()
        .genesis_duration(1_000)
        .exit_window_delay(2_000)
        .build()
        .unwrap();
    let alice = AccountId::named("alice");
    let mut protocol = Protocol::new(params).unwrap();
    protocol.init_genesis(gov()).unwrap();
    protocol
        .mint(gov(), TokenId::Reserve, alice, 10_000 * WAD)
        .unwrap();
    protocol
        .genesis_purchase(alice, alice, 10_000 * WAD)
        .unwrap();
    protocol.advance_time(1_000);
    protocol.launch(gov()).unwrap();
    protocol
        .grant_role(gov(), Role::PcvController, controller())
        .unwrap();
    protocol
}

fn assert_clean(protocol: &Protocol) {
    let violations = protocol.check_invariants();
    assert!(violations.is_empty(), "violations: {violations:?}");
}

// =============================================================================
// Deposits into protocol-owned liquidity
// =============================================================================

#[test]
fn pcv_deposit_grows_the_pool_at_its_ratio() {
    let mut protocol = launched_protocol();
    let bob = AccountId::named("bob");
    let account = protocol.treasury_deposit_account(DepositId(0)).unwrap();
    protocol
        .mint(gov(), TokenId::Reserve, bob, 500 * WAD)
        .unwrap();

    // Fund the deposit first, then trigger the pairing.
    protocol
        .transfer(bob, TokenId::Reserve, account, 500 * WAD)
        .unwrap();
    let stable_before = protocol.total_supply(TokenId::Stable);
    protocol.pcv_deposit(DepositId(0), 500 * WAD).unwrap();

    // 500 reserve at the 1.05 pool ratio pairs with 525 minted stablecoin.
    let (reserve, stable) = protocol.reserves(TokenId::Reserve, TokenId::Stable).unwrap();
    assert_eq!(reserve, 10_500 * WAD);
    assert_eq!(stable, 11_025 * WAD);
    assert_eq!(
        protocol.total_supply(TokenId::Stable),
        stable_before + 525 * WAD
    );
    assert_eq!(protocol.balance_of(TokenId::Reserve, account), 0);
    assert_clean(&protocol);

    // Bad inputs. The deposit paired everything, so another trigger has
    // nothing to draw on.
    let err = protocol.pcv_deposit(DepositId(0), WAD).unwrap_err();
    assert!(matches!(err, KeelError::InsufficientFunds(_)));
    let err = protocol.pcv_deposit(DepositId(0), 0).unwrap_err();
    assert!(matches!(err, KeelError::InvalidInput(_)));
    let err = protocol.pcv_deposit(DepositId(9), WAD).unwrap_err();
    assert!(matches!(err, KeelError::NotFound(_)));
}

#[test]
fn removing_liquidity_burns_the_stablecoin_side() {
    let mut protocol = launched_protocol();
    let deposit = DepositId(0);
    let account = protocol.treasury_deposit_account(deposit).unwrap();
    let lp = TokenId::Lp(protocol.main_pair());
    let held = protocol.balance_of(lp, account);
    let stable_supply_before = protocol.total_supply(TokenId::Stable);

    let (reserve_out, stable_out) = protocol
        .pcv_remove_liquidity(controller(), deposit, held / 2, 0, 0)
        .unwrap();
    assert!(reserve_out > 0);
    assert!(stable_out > 0);

    // The reserve side stays custodied in the deposit; the stablecoin side
    // left circulation entirely.
    assert_eq!(protocol.balance_of(TokenId::Reserve, account), reserve_out);
    assert_eq!(protocol.balance_of(TokenId::Stable, account), 0);
    assert_eq!(
        protocol.total_supply(TokenId::Stable),
        stable_supply_before - stable_out
    );
    assert_eq!(protocol.balance_of(lp, account), held - held / 2);
    assert_clean(&protocol);

    // Slippage guard leaves state untouched.
    let before = protocol.balance_of(TokenId::Reserve, account);
    let err = protocol
        .pcv_remove_liquidity(controller(), deposit, held / 4, u128::MAX, 0)
        .unwrap_err();
    assert!(matches!(err, KeelError::Slippage(_)));
    assert_eq!(protocol.balance_of(TokenId::Reserve, account), before);
    assert_clean(&protocol);
}

#[test]
fn withdrawals_are_controller_gated_and_skip_the_pause() {
    let mut protocol = launched_protocol();
    let bob = AccountId::named("bob");
    let deposit = DepositId(0);
    let account = protocol.treasury_deposit_account(deposit).unwrap();
    let lp = TokenId::Lp(protocol.main_pair());
    let held = protocol.balance_of(lp, account);

    // Give the deposit some unpooled reserve to withdraw.
    let (reserve_out, _) = protocol
        .pcv_remove_liquidity(controller(), deposit, held / 2, 0, 0)
        .unwrap();

    let err = protocol
        .pcv_withdraw(bob, deposit, bob, reserve_out)
        .unwrap_err();
    assert!(matches!(err, KeelError::Unauthorized(_)));

    protocol
        .pcv_withdraw(controller(), deposit, bob, reserve_out / 2)
        .unwrap();
    assert_eq!(
        protocol.balance_of(TokenId::Reserve, bob),
        reserve_out / 2
    );

    // Pausing the component blocks deposits but never the exits.
    protocol.pause(gov(), Component::TreasuryDeposit).unwrap();
    let err = protocol.pcv_deposit(deposit, 100 * WAD).unwrap_err();
    assert!(matches!(err, KeelError::Paused(_)));

    let drained = protocol
        .pcv_force_withdraw(controller(), deposit, bob)
        .unwrap();
    assert_eq!(drained, reserve_out - reserve_out / 2);
    assert_eq!(protocol.balance_of(TokenId::Reserve, account), 0);
    assert_clean(&protocol);
}

// =============================================================================
// Redemption unit
// =============================================================================

#[test]
fn redemption_burns_stable_and_mints_governance() {
    let mut protocol = launched_protocol();
    let alice = AccountId::named("alice");
    protocol.genesis_redeem(alice).unwrap();

    let stable_before = protocol.total_supply(TokenId::Stable);
    let gov_before = protocol.balance_of(TokenId::Gov, alice);

    // 100 stable at 5:1 minus the 0.1% fee.
    let out = protocol
        .redeem_purchase(alice, alice, 100 * WAD, 0, protocol.now())
        .unwrap();
    assert_eq!(out, 499_500_000_000_000_000_000);
    assert_eq!(
        protocol.balance_of(TokenId::Gov, alice),
        gov_before + out
    );
    assert_eq!(
        protocol.total_supply(TokenId::Stable),
        stable_before - 100 * WAD
    );
    assert_clean(&protocol);

    // Slippage and pause gates.
    let err = protocol
        .redeem_purchase(alice, alice, 100 * WAD, 500 * WAD, protocol.now())
        .unwrap_err();
    assert!(matches!(err, KeelError::Slippage(_)));

    protocol.pause(gov(), Component::RedemptionUnit).unwrap();
    let err = protocol
        .redeem_purchase(alice, alice, 100 * WAD, 0, protocol.now())
        .unwrap_err();
    assert!(matches!(err, KeelError::Paused(_)));
    protocol.unpause(gov(), Component::RedemptionUnit).unwrap();
    protocol
        .redeem_purchase(alice, alice, 100 * WAD, 0, protocol.now())
        .unwrap();
    assert_clean(&protocol);
}

#[test]
fn redemption_needs_stablecoin_on_hand() {
    let mut protocol = launched_protocol();
    let pauper = AccountId::named("pauper");
    let err = protocol
        .redeem_purchase(pauper, pauper, 100 * WAD, 0, protocol.now())
        .unwrap_err();
    assert!(matches!(err, KeelError::InsufficientFunds(_)));
}

// =============================================================================
// Deposit registry and allocation targets
// =============================================================================

#[test]
fn allocation_can_split_across_registered_deposits() {
    let mut protocol = launched_protocol();
    let bob = AccountId::named("bob");
    let second = protocol.add_treasury_deposit(gov()).unwrap();
    assert_eq!(second, DepositId(1));

    // 70/30 split between the genesis deposit and the new one.
    protocol
        .set_allocation_targets(
            gov(),
            vec![
                (DepositId(0), Bps::new(7_000).unwrap()),
                (second, Bps::new(3_000).unwrap()),
            ],
        )
        .unwrap();

    protocol
        .mint(gov(), TokenId::Reserve, bob, 1_000 * WAD)
        .unwrap();
    protocol
        .curve_purchase(bob, bob, 1_000 * WAD, 0, protocol.now())
        .unwrap();
    protocol.curve_allocate(bob).unwrap();

    // Both deposits ended up with LP proportional to their weights.
    let lp = TokenId::Lp(protocol.main_pair());
    let first_account = protocol.treasury_deposit_account(DepositId(0)).unwrap();
    let second_account = protocol.treasury_deposit_account(second).unwrap();
    let genesis_lp = 10_246_950_765_959_598_382_221u128;
    let first_gain = protocol.balance_of(lp, first_account) - genesis_lp;
    let second_gain = protocol.balance_of(lp, second_account);
    assert!(first_gain > 0);
    assert!(second_gain > 0);
    // 700 and 300 reserve shares at the same pool ratio.
    let ratio = first_gain as f64 / second_gain as f64;
    assert!((ratio - 7.0 / 3.0).abs() < 1e-9, "ratio {ratio}");
    assert_clean(&protocol);

    // Unknown deposits cannot become targets.
    let err = protocol
        .set_allocation_targets(gov(), vec![(DepositId(9), Bps::MAX)])
        .unwrap_err();
    assert!(matches!(err, KeelError::NotFound(_)));
}

#[test]
fn mixed_operation_sequence_keeps_global_invariants() {
    let mut protocol = launched_protocol();
    let alice = AccountId::named("alice");
    let bob = AccountId::named("bob");
    protocol.genesis_redeem(alice).unwrap();
    protocol
        .mint(gov(), TokenId::Reserve, bob, 5_000 * WAD)
        .unwrap();
    assert_clean(&protocol);

    protocol
        .curve_purchase(bob, bob, 1_000 * WAD, 0, protocol.now())
        .unwrap();
    assert_clean(&protocol);

    protocol
        .swap(bob, TokenId::Reserve, TokenId::Stable, 200 * WAD, 0)
        .unwrap();
    assert_clean(&protocol);

    protocol.curve_allocate(bob).unwrap();
    assert_clean(&protocol);

    protocol
        .redeem_purchase(alice, alice, 50 * WAD, 0, protocol.now())
        .unwrap();
    assert_clean(&protocol);

    protocol.advance_time(1_800);
    protocol
        .update_oracle(TokenId::Reserve, TokenId::Stable)
        .unwrap();
    assert_clean(&protocol);
    protocol.verify_event_chain().unwrap();
}
