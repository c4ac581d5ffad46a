//! Protocol engine.
//!
//! [`Protocol`] owns every component and is the only mutation surface of the
//! kernel. Operations take the caller's [`AccountId`] explicitly, validate
//! against the access registry and the component state, and either commit
//! fully or leave state untouched. Time and block height are simulated:
//! drivers advance them between operations and the kernel never reads a
//! clock.
//!
//! Check ordering inside an operation is fixed: paused component first, then
//! lifecycle phase, then timing, then authorization, then input validation,
//! then funds. Tests rely on this ordering to distinguish failure causes.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::amm::{self, AddLiquidityOutcome, PairBook};
use crate::bounds::RuntimeBounds;
use crate::config::ProtocolParams;
use crate::core::{Component, Core, Role};
use crate::curve::BondingCurve;
use crate::events::{Event, EventLog, EventRecord};
use crate::farm::{RewardPools, RewardSchedule};
use crate::genesis::{GenesisAuction, GenesisQuote, RedemptionAmounts};
use crate::invariants::{self, InvariantId, InvariantViolation};
use crate::math::{add_amount, Ratio};
use crate::oracle::{FixedPriceSource, FixedSupplyCap, PriceSource, SupplyCapSource, TwapOracle};
use crate::pcv::{self, DepositBook};
use crate::redemption::RedemptionUnit;
use crate::swap_mining::SwapMining;
use crate::token::Bank;
use crate::types::{AccountId, Amount, Bps, DepositId, FarmKind, PairId, PoolId, TokenId};
use crate::vesting::VestingLedger;
use crate::{KeelError, Result};

/// The assembled protocol state machine.
///
/// Construction wires the components together: the main reserve/stablecoin
/// pair, treasury deposit 0 as the initial allocation target, and the fixed
/// price and supply-cap sources derived from parameters. All component
/// accounts are registered so keeper entry points can reject them as callers.
#[derive(Debug)]
pub struct Protocol {
    params: ProtocolParams,
    bounds: RuntimeBounds,
    now: u64,
    block: u64,

    core: Core,
    bank: Bank,
    pairs: PairBook,
    twap: TwapOracle,
    genesis: GenesisAuction,
    curve: BondingCurve,
    stake_farm: RewardPools,
    stake_tokens: Vec<TokenId>,
    swap_mining: SwapMining,
    vesting: VestingLedger,
    deposits: DepositBook,
    redemption: RedemptionUnit,
    events: EventLog,

    price_source: Box<dyn PriceSource>,
    supply_cap_source: Box<dyn SupplyCapSource>,
    contract_accounts: BTreeSet<AccountId>,

    governor: AccountId,
    treasury: AccountId,
    main_pair: PairId,
    auction_account: AccountId,
    curve_account: AccountId,
    vesting_account: AccountId,
    farm_account: AccountId,
}

impl Protocol {
    /// Builds a protocol instance from validated parameters, with the fixed
    /// price and supply-cap sources those parameters describe.
    pub fn new(params: ProtocolParams) -> Result<Protocol> {
        let price_source = Box::new(FixedPriceSource::new(params.curve.price)?);
        let supply_cap_source = Box::new(FixedSupplyCap::new(params.curve.stable_supply_cap));
        Protocol::with_sources(
            params,
            RuntimeBounds::default(),
            price_source,
            supply_cap_source,
        )
    }

    /// Builds a protocol instance with caller-supplied oracle sources, for
    /// drivers that feed external prices or a dynamic supply cap.
    pub fn with_sources(
        params: ProtocolParams,
        bounds: RuntimeBounds,
        price_source: Box<dyn PriceSource>,
        supply_cap_source: Box<dyn SupplyCapSource>,
    ) -> Result<Protocol> {
        params.validate()?;
        bounds.validate()?;

        let governor = AccountId::named(&params.accounts.governor);
        let treasury = AccountId::named(&params.accounts.treasury);
        let auction_account = AccountId::named("keel/auction");
        let curve_account = AccountId::named("keel/curve");
        let vesting_account = AccountId::named("keel/vesting");
        let farm_account = AccountId::named("keel/farm");

        let core = Core::new(governor);
        let bank = Bank::new();
        let mut pairs = PairBook::new();
        let main_pair = pairs.create(TokenId::Reserve, TokenId::Stable, 0)?;
        let twap = TwapOracle::new(params.oracle.twap_period)?;
        let genesis = GenesisAuction::new(&params.genesis);
        let mut deposits = DepositBook::new();
        let genesis_deposit = deposits.add(bounds.max_deposits)?;
        let curve = BondingCurve::new(&params.curve, 0, genesis_deposit)?;
        let stake_farm = RewardPools::new(RewardSchedule {
            reward_per_block: params.farm.stake_reward_per_block,
            start_block: params.farm.start_block,
            end_block: params.farm.end_block,
        })?;
        let swap_mining = SwapMining::new(
            RewardSchedule {
                reward_per_block: params.farm.volume_reward_per_block,
                start_block: params.farm.start_block,
                end_block: params.farm.end_block,
            },
            TokenId::Gov,
        )?;
        let vesting = VestingLedger::new(
            0,
            params.vesting.epoch_length,
            params.vesting.vesting_epochs,
            bounds.max_tranches_per_account,
        )?;
        let redemption = RedemptionUnit::new(&params.redemption)?;

        let mut contract_accounts = BTreeSet::new();
        for account in [
            auction_account,
            curve_account,
            vesting_account,
            farm_account,
            amm::locked_account(),
            amm::pair_account(main_pair),
            pcv::deposit_account(genesis_deposit),
        ] {
            contract_accounts.insert(account);
        }

        Ok(Protocol {
            params,
            bounds,
            now: 0,
            block: 0,
            core,
            bank,
            pairs,
            twap,
            genesis,
            curve,
            stake_farm,
            stake_tokens: Vec::new(),
            swap_mining,
            vesting,
            deposits,
            redemption,
            events: EventLog::new(),
            price_source,
            supply_cap_source,
            contract_accounts,
            governor,
            treasury,
            main_pair,
            auction_account,
            curve_account,
            vesting_account,
            farm_account,
        })
    }

    // --- clock ---

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    /// Advances the simulated wall clock. Time never goes backwards.
    pub fn advance_time(&mut self, seconds: u64) {
        self.now = self.now.saturating_add(seconds);
    }

    /// Advances the simulated block height.
    pub fn advance_blocks(&mut self, blocks: u64) {
        self.block = self.block.saturating_add(blocks);
    }

    // --- views ---

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn bounds(&self) -> RuntimeBounds {
        self.bounds
    }

    pub fn governor(&self) -> AccountId {
        self.governor
    }

    pub fn treasury(&self) -> AccountId {
        self.treasury
    }

    pub fn auction_account(&self) -> AccountId {
        self.auction_account
    }

    pub fn main_pair(&self) -> PairId {
        self.main_pair
    }

    pub fn has_launched(&self) -> bool {
        self.core.has_launched()
    }

    pub fn balance_of(&self, token: TokenId, account: AccountId) -> Amount {
        self.bank.balance_of(token, account)
    }

    pub fn total_supply(&self, token: TokenId) -> Amount {
        self.bank.total_supply(token)
    }

    pub fn allowance(&self, token: TokenId, owner: AccountId, spender: AccountId) -> Amount {
        self.bank.allowance(token, owner, spender)
    }

    pub fn events(&self) -> &[EventRecord] {
        self.events.records()
    }

    pub fn verify_event_chain(&self) -> Result<()> {
        self.events.verify()
    }

    fn push_event(&mut self, event: Event) -> Result<()> {
        self.events.append(self.block, self.now, event)
    }

    // --- roles and pausing ---

    pub fn has_role(&self, role: Role, account: AccountId) -> bool {
        self.core.has_role(role, account)
    }

    pub fn grant_role(&mut self, caller: AccountId, role: Role, account: AccountId) -> Result<()> {
        self.core.ensure_governor(caller)?;
        self.core.grant_role(role, account);
        self.push_event(Event::RoleGranted { role, account })
    }

    pub fn revoke_role(&mut self, caller: AccountId, role: Role, account: AccountId) -> Result<()> {
        self.core.ensure_governor(caller)?;
        self.core.revoke_role(role, account);
        self.push_event(Event::RoleRevoked { role, account })
    }

    pub fn is_paused(&self, component: Component) -> bool {
        self.core.is_paused(component)
    }

    pub fn pause(&mut self, caller: AccountId, component: Component) -> Result<()> {
        self.core.ensure_governor_or_guardian(caller)?;
        self.core.pause(component);
        self.push_event(Event::ComponentPaused { component })
    }

    pub fn unpause(&mut self, caller: AccountId, component: Component) -> Result<()> {
        self.core.ensure_governor_or_guardian(caller)?;
        self.core.unpause(component);
        self.push_event(Event::ComponentUnpaused { component })
    }

    // --- token operations ---

    /// Mints `amount` of a primary token to `to`. Requires the Minter role.
    /// LP tokens cannot be minted directly; they only come from pairs.
    pub fn mint(
        &mut self,
        caller: AccountId,
        token: TokenId,
        to: AccountId,
        amount: Amount,
    ) -> Result<()> {
        self.core.ensure_minter(caller)?;
        if matches!(token, TokenId::Lp(_)) {
            return Err(KeelError::InvalidInput(
                "lp tokens cannot be minted directly".into(),
            ));
        }
        self.bank.mint(token, to, amount)?;
        self.push_event(Event::Minted { token, to, amount })
    }

    pub fn transfer(
        &mut self,
        caller: AccountId,
        token: TokenId,
        to: AccountId,
        amount: Amount,
    ) -> Result<()> {
        self.bank.transfer(token, caller, to, amount)
    }

    pub fn approve(
        &mut self,
        caller: AccountId,
        token: TokenId,
        spender: AccountId,
        amount: Amount,
    ) -> Result<()> {
        self.bank.approve(token, caller, spender, amount)
    }

    pub fn transfer_from(
        &mut self,
        caller: AccountId,
        token: TokenId,
        owner: AccountId,
        to: AccountId,
        amount: Amount,
    ) -> Result<()> {
        self.bank.transfer_from(token, caller, owner, to, amount)
    }

    // --- genesis ---

    /// Opens the genesis commitment window at the current time.
    ///
    /// Preconditions: caller is governor; genesis not yet initialized.
    pub fn init_genesis(&mut self, caller: AccountId) -> Result<()> {
        self.core.ensure_governor(caller)?;
        self.genesis.initialize(self.now)?;
        info!(
            start = self.now,
            duration = self.params.genesis.duration,
            "genesis window opened"
        );
        self.push_event(Event::GenesisInitialized {
            start: self.now,
            duration: self.params.genesis.duration,
        })
    }

    pub fn genesis_is_open(&self) -> bool {
        self.genesis.is_open(self.now)
    }

    pub fn genesis_committed(&self, account: AccountId) -> Amount {
        self.genesis.committed(account)
    }

    pub fn genesis_total_committed(&self) -> Amount {
        self.genesis.total_committed()
    }

    /// Commits `amount` of reserve from `caller`, credited to `beneficiary`.
    ///
    /// Preconditions: window open; `amount` > 0; caller holds the reserve.
    /// Postconditions: reserve moves to the auction account and the
    /// beneficiary's commitment grows by `amount`.
    pub fn genesis_purchase(
        &mut self,
        caller: AccountId,
        beneficiary: AccountId,
        amount: Amount,
    ) -> Result<()> {
        self.genesis.ensure_open(self.now)?;
        if amount == 0 {
            return Err(KeelError::InvalidInput("no value sent".into()));
        }
        if self.bank.balance_of(TokenId::Reserve, caller) < amount {
            return Err(KeelError::InsufficientFunds(
                "insufficient reserve balance".into(),
            ));
        }
        self.genesis
            .commit(beneficiary, amount, self.now, self.bounds.max_committers)?;
        self.bank
            .transfer(TokenId::Reserve, caller, self.auction_account, amount)?;
        self.push_event(Event::GenesisPurchase {
            from: caller,
            beneficiary,
            amount,
        })
    }

    /// Quotes the stablecoin and governance amounts a commitment would
    /// receive at launch under current totals. `inclusive` treats `amount_in`
    /// as already part of the committed total.
    pub fn genesis_amount_out(&self, amount_in: Amount, inclusive: bool) -> Result<GenesisQuote> {
        let price = self.price_source.latest_price()?;
        self.genesis.quote(amount_in, inclusive, &self.curve, price)
    }

    /// Allows or revokes `operator` acting for the caller in emergency exit.
    pub fn set_exit_approval(
        &mut self,
        caller: AccountId,
        operator: AccountId,
        approved: bool,
    ) -> Result<()> {
        self.genesis.set_exit_approval(caller, operator, approved);
        self.push_event(Event::ExitApprovalSet {
            owner: caller,
            operator,
            approved,
        })
    }

    /// Returns a stuck commitment to `to` after the exit window opens.
    ///
    /// Preconditions: launch has not happened; the exit delay has elapsed;
    /// caller is `owner` or an approved operator; `owner` has a commitment.
    pub fn genesis_emergency_exit(
        &mut self,
        caller: AccountId,
        owner: AccountId,
        to: AccountId,
    ) -> Result<Amount> {
        self.genesis.ensure_exit_window(self.now)?;
        if !self.genesis.exit_allowed(caller, owner) {
            return Err(KeelError::Unauthorized(
                "not approved for emergency exit".into(),
            ));
        }
        let amount = self.genesis.take_exit(owner)?;
        self.bank
            .transfer(TokenId::Reserve, self.auction_account, to, amount)?;
        self.push_event(Event::GenesisExit {
            account: owner,
            to,
            amount,
        })?;
        Ok(amount)
    }

    /// Executes the one-time launch: prices the effective commitment through
    /// the bonding curve, mints the stablecoin and the fixed governance
    /// allocation, seeds protocol-owned liquidity, and flips the phase flag.
    ///
    /// Preconditions: caller is governor; window ended; not yet launched;
    /// at least one commitment exists.
    /// Postconditions: the auction holds the minted stablecoin and
    /// governance for pro-rata redemption, the effective reserve sits in the
    /// main pair as protocol-owned liquidity, and post-genesis operations
    /// are unlocked.
    pub fn launch(&mut self, caller: AccountId) -> Result<()> {
        if self.core.has_launched() {
            return Err(KeelError::AlreadyDone("launch already happened".into()));
        }
        self.core.ensure_governor(caller)?;
        self.genesis.ensure_ended(self.now)?;
        let total = self.genesis.total_committed();
        if total == 0 {
            return Err(KeelError::InvalidInput("nothing committed".into()));
        }
        // Oversubscribed launches spend the per-account floors, not the cap,
        // so the reserve left in the auction covers the refunds exactly.
        let effective = self.genesis.launch_spend()?;
        let price = self.price_source.latest_price()?;
        let stable_out = self.curve.amount_out(price, effective)?;
        let governance_allocation = self.genesis.governance_allocation();

        // The launch mint plus the liquidity-matching mint must fit under
        // the supply cap. The matching amount is estimated against the
        // current pool state; per-deposit splits can differ by rounding dust.
        let pool_reserves = self.main_pool_reserves()?;
        let stable_match = pcv::stable_to_match(effective, pool_reserves, price)?;
        let projected = add_amount(
            add_amount(self.bank.total_supply(TokenId::Stable), stable_out)?,
            stable_match,
        )?;
        if projected > self.supply_cap_source.supply_cap()? {
            return Err(KeelError::Capacity("supply cap exceeded".into()));
        }

        // Commit.
        self.bank
            .mint(TokenId::Stable, self.auction_account, stable_out)?;
        self.bank
            .mint(TokenId::Gov, self.auction_account, governance_allocation)?;
        self.bank.transfer(
            TokenId::Reserve,
            self.auction_account,
            self.curve_account,
            effective,
        )?;
        let liquidity = self.allocate_internal(price)?;
        self.genesis
            .mark_launched(effective, stable_out, governance_allocation)?;
        self.core.set_launched()?;
        self.prime_oracle()?;
        info!(
            total_committed = %total,
            effective = %effective,
            stable_minted = %stable_out,
            "protocol launched"
        );
        self.push_event(Event::Launched {
            total_effective: effective,
            stable_minted: stable_out,
            governance_allocation,
            liquidity,
        })
    }

    /// What `account` would receive from [`Protocol::genesis_redeem`] now.
    pub fn genesis_amounts_to_redeem(&self, account: AccountId) -> Result<RedemptionAmounts> {
        self.genesis.amounts_to_redeem(account)
    }

    /// Pays out `account`'s pro-rata share of the launch mint, plus the
    /// over-cap refund when the auction was oversubscribed. Callable by
    /// anyone on behalf of `account`; funds always go to `account`.
    pub fn genesis_redeem(&mut self, account: AccountId) -> Result<RedemptionAmounts> {
        let out = self.genesis.redeem_due(account)?;
        if out.stable > 0 {
            self.bank
                .transfer(TokenId::Stable, self.auction_account, account, out.stable)?;
        }
        if out.governance > 0 {
            self.bank
                .transfer(TokenId::Gov, self.auction_account, account, out.governance)?;
        }
        if out.refund > 0 {
            self.bank
                .transfer(TokenId::Reserve, self.auction_account, account, out.refund)?;
        }
        self.genesis.settle_redeem(account, out)?;
        self.push_event(Event::GenesisRedeem {
            account,
            stable: out.stable,
            governance: out.governance,
            refund: out.refund,
        })?;
        Ok(out)
    }

    // --- bonding curve ---

    pub fn curve_price(&self) -> Result<Ratio> {
        self.price_source.latest_price()
    }

    pub fn curve_amount_out(&self, amount_in: Amount) -> Result<Amount> {
        let price = self.price_source.latest_price()?;
        self.curve.amount_out(price, amount_in)
    }

    pub fn curve_amount_in(&self, amount_out: Amount) -> Result<Amount> {
        let price = self.price_source.latest_price()?;
        self.curve.amount_in(price, amount_out)
    }

    pub fn allocation_targets(&self) -> &[(DepositId, Bps)] {
        self.curve.allocation_targets()
    }

    /// Buys stablecoin from the curve with reserve collateral.
    ///
    /// Preconditions: curve not paused; launched; `deadline` not passed;
    /// `amount_in` > 0; output meets `min_amount_out`; the mint fits under
    /// the supply cap; caller holds the reserve.
    pub fn curve_purchase(
        &mut self,
        caller: AccountId,
        to: AccountId,
        amount_in: Amount,
        min_amount_out: Amount,
        deadline: u64,
    ) -> Result<Amount> {
        self.core.ensure_not_paused(Component::BondingCurve)?;
        self.core.ensure_launched()?;
        if self.now > deadline {
            return Err(KeelError::Timing("deadline expired".into()));
        }
        if amount_in == 0 {
            return Err(KeelError::InvalidInput("no value sent".into()));
        }
        let price = self.price_source.latest_price()?;
        let amount_out = self.curve.amount_out(price, amount_in)?;
        if amount_out < min_amount_out {
            return Err(KeelError::Slippage("output below minimum".into()));
        }
        let projected = add_amount(self.bank.total_supply(TokenId::Stable), amount_out)?;
        if projected > self.supply_cap_source.supply_cap()? {
            return Err(KeelError::Capacity("supply cap exceeded".into()));
        }
        if self.bank.balance_of(TokenId::Reserve, caller) < amount_in {
            return Err(KeelError::InsufficientFunds(
                "insufficient reserve balance".into(),
            ));
        }

        // Commit.
        self.bank
            .transfer(TokenId::Reserve, caller, self.curve_account, amount_in)?;
        self.bank.mint(TokenId::Stable, to, amount_out)?;
        debug!(amount_in = %amount_in, amount_out = %amount_out, "curve purchase");
        self.push_event(Event::CurvePurchase {
            to,
            amount_in,
            amount_out,
        })?;
        Ok(amount_out)
    }

    pub fn curve_incentive_due(&self) -> bool {
        self.curve.incentive_due(self.now)
    }

    /// Sweeps the curve's accumulated reserve into the treasury deposits per
    /// the allocation weights, paying the caller the keeper incentive when
    /// the cooldown has elapsed. Component accounts cannot trigger sweeps.
    pub fn curve_allocate(&mut self, caller: AccountId) -> Result<Amount> {
        self.core.ensure_not_paused(Component::BondingCurve)?;
        self.core.ensure_launched()?;
        if self.contract_accounts.contains(&caller) {
            return Err(KeelError::Unauthorized("contract caller".into()));
        }
        let total = self.bank.balance_of(TokenId::Reserve, self.curve_account);
        if total == 0 {
            return Err(KeelError::InsufficientFunds("nothing to allocate".into()));
        }
        let price = self.price_source.latest_price()?;
        self.allocate_internal(price)?;
        let incentive = self.curve.take_incentive(self.now).unwrap_or(0);
        if incentive > 0 {
            self.bank.mint(TokenId::Stable, caller, incentive)?;
        }
        info!(total = %total, incentive = %incentive, "curve allocation swept");
        self.push_event(Event::Allocated {
            caller,
            total,
            incentive,
        })?;
        Ok(total)
    }

    /// Replaces the allocation weights. Every target must be a registered
    /// deposit and the weights must sum to exactly 100%.
    pub fn set_allocation_targets(
        &mut self,
        caller: AccountId,
        targets: Vec<(DepositId, Bps)>,
    ) -> Result<()> {
        self.core.ensure_governor(caller)?;
        for (deposit, _) in &targets {
            if !self.deposits.contains(*deposit) {
                return Err(KeelError::NotFound("unknown deposit".into()));
            }
        }
        self.curve
            .set_allocation_targets(targets, self.bounds.max_allocation_targets)?;
        self.push_event(Event::ParamsUpdated {
            what: "allocation targets".into(),
        })
    }

    /// Main-pair reserves oriented (reserve, stable), or `None` while empty.
    fn main_pool_reserves(&self) -> Result<Option<(Amount, Amount)>> {
        let pair = self.pairs.get(self.main_pair)?;
        let (reserve, stable) = pair.reserves_for(TokenId::Reserve)?;
        if reserve > 0 && stable > 0 {
            Ok(Some((reserve, stable)))
        } else {
            Ok(None)
        }
    }

    /// Distributes the curve account's reserve across the allocation targets
    /// and pairs each share with freshly minted stablecoin in the main pool.
    /// Returns the total liquidity minted.
    fn allocate_internal(&mut self, price: Ratio) -> Result<Amount> {
        let total = self.bank.balance_of(TokenId::Reserve, self.curve_account);
        let splits = self.curve.split_allocation(total)?;
        let mut liquidity_total: Amount = 0;
        for (deposit, share) in splits {
            if share == 0 {
                continue;
            }
            let account = self.deposits.get(deposit)?.account;
            self.bank
                .transfer(TokenId::Reserve, self.curve_account, account, share)?;
            let liquidity = self.deposit_to_pool(deposit, share, price)?;
            liquidity_total = add_amount(liquidity_total, liquidity)?;
        }
        Ok(liquidity_total)
    }

    /// Pairs `amount` of reserve already held by `deposit` with minted
    /// stablecoin and adds both to the main pool. The stablecoin side
    /// follows the pool ratio once the pool has depth, else the oracle
    /// price, so the deposit never moves the price itself.
    fn deposit_to_pool(&mut self, deposit: DepositId, amount: Amount, price: Ratio) -> Result<Amount> {
        let account = self.deposits.get(deposit)?.account;
        let pool_reserves = self.main_pool_reserves()?;
        let stable_needed = pcv::stable_to_match(amount, pool_reserves, price)?;
        if stable_needed == 0 {
            return Err(KeelError::InvalidInput(
                "deposit too small to pair with stablecoin".into(),
            ));
        }
        self.bank.mint(TokenId::Stable, account, stable_needed)?;
        // Amounts are computed from the same reserves the add reads, so the
        // minimums can be exact.
        let outcome = self.pairs.add_liquidity(
            &mut self.bank,
            account,
            TokenId::Reserve,
            TokenId::Stable,
            amount,
            stable_needed,
            amount,
            stable_needed,
            self.now,
        )?;
        self.push_event(Event::PcvDeposited {
            deposit,
            amount,
            stable_minted: stable_needed,
            liquidity: outcome.liquidity,
        })?;
        Ok(outcome.liquidity)
    }

    // --- amm ---

    /// Registers a new pair. Permissionless, like pool creation on the
    /// underlying exchange model.
    pub fn create_pair(&mut self, token_a: TokenId, token_b: TokenId) -> Result<PairId> {
        let id = self.pairs.create(token_a, token_b, self.now)?;
        self.contract_accounts.insert(amm::pair_account(id));
        let (token0, token1) = {
            let pair = self.pairs.get(id)?;
            (pair.token0, pair.token1)
        };
        self.push_event(Event::PairCreated {
            pair: id,
            token0,
            token1,
        })?;
        Ok(id)
    }

    pub fn pair_exists(&self, token_a: TokenId, token_b: TokenId) -> bool {
        self.pairs.exists(token_a, token_b)
    }

    /// Reserves oriented so the first element corresponds to `token_a`.
    pub fn reserves(&self, token_a: TokenId, token_b: TokenId) -> Result<(Amount, Amount)> {
        let (_, pair) = self.pairs.get_by_tokens(token_a, token_b)?;
        pair.reserves_for(token_a)
    }

    pub fn add_liquidity(
        &mut self,
        caller: AccountId,
        token_a: TokenId,
        token_b: TokenId,
        amount_a_desired: Amount,
        amount_b_desired: Amount,
        amount_a_min: Amount,
        amount_b_min: Amount,
    ) -> Result<AddLiquidityOutcome> {
        let outcome = self.pairs.add_liquidity(
            &mut self.bank,
            caller,
            token_a,
            token_b,
            amount_a_desired,
            amount_b_desired,
            amount_a_min,
            amount_b_min,
            self.now,
        )?;
        let id = PairId::derive(token_a, token_b);
        let token0 = self.pairs.get(id)?.token0;
        let (amount0, amount1) = if token_a == token0 {
            (outcome.amount_a, outcome.amount_b)
        } else {
            (outcome.amount_b, outcome.amount_a)
        };
        self.push_event(Event::LiquidityAdded {
            pair: id,
            provider: caller,
            amount0,
            amount1,
            liquidity: outcome.liquidity,
        })?;
        Ok(outcome)
    }

    pub fn remove_liquidity(
        &mut self,
        caller: AccountId,
        token_a: TokenId,
        token_b: TokenId,
        liquidity: Amount,
        amount_a_min: Amount,
        amount_b_min: Amount,
    ) -> Result<(Amount, Amount)> {
        let (amount_a, amount_b) = self.pairs.remove_liquidity(
            &mut self.bank,
            caller,
            token_a,
            token_b,
            liquidity,
            amount_a_min,
            amount_b_min,
            self.now,
        )?;
        let id = PairId::derive(token_a, token_b);
        let token0 = self.pairs.get(id)?.token0;
        let (amount0, amount1) = if token_a == token0 {
            (amount_a, amount_b)
        } else {
            (amount_b, amount_a)
        };
        self.push_event(Event::LiquidityRemoved {
            pair: id,
            provider: caller,
            liquidity,
            amount0,
            amount1,
        })?;
        Ok((amount_a, amount_b))
    }

    /// Swaps through one pair, then credits swap-mining volume when both
    /// sides are whitelisted and the output is routable to the anchor token.
    /// Unroutable volume is skipped; the swap itself still stands.
    pub fn swap(
        &mut self,
        caller: AccountId,
        token_in: TokenId,
        token_out: TokenId,
        amount_in: Amount,
        min_amount_out: Amount,
    ) -> Result<Amount> {
        let amount_out = self.pairs.swap(
            &mut self.bank,
            caller,
            token_in,
            token_out,
            amount_in,
            min_amount_out,
            self.now,
        )?;
        let id = PairId::derive(token_in, token_out);
        debug!(
            token_in = %token_in.label(),
            token_out = %token_out.label(),
            amount_in = %amount_in,
            amount_out = %amount_out,
            "swap"
        );
        self.push_event(Event::Swapped {
            pair: id,
            account: caller,
            token_in,
            amount_in,
            amount_out,
        })?;
        self.record_swap_volume(id, caller, token_in, token_out, amount_out)?;
        Ok(amount_out)
    }

    // --- oracle ---

    /// Feeds the pair's current cumulative prices to the TWAP oracle.
    /// Returns whether a fresh average was produced. Permissionless.
    pub fn update_oracle(&mut self, token_a: TokenId, token_b: TokenId) -> Result<bool> {
        let (id, pair) = self.pairs.get_by_tokens(token_a, token_b)?;
        let (cum0, cum1) = pair.cumulatives_at(self.now);
        let refreshed = self.twap.update(id, cum0, cum1, self.now)?;
        if refreshed {
            self.push_event(Event::OracleUpdated { pair: id })?;
        }
        Ok(refreshed)
    }

    pub fn oracle_has_price(&self, token_a: TokenId, token_b: TokenId) -> bool {
        self.twap.has_price(PairId::derive(token_a, token_b))
    }

    /// Values `amount` of `token` in anchor-token units through the TWAP
    /// oracle, routing through at most one whitelisted intermediate.
    pub fn swap_quantity(&self, token: TokenId, amount: Amount) -> Result<Amount> {
        self.anchor_quantity(token, amount)
    }

    /// Records the first observation for the main pair so the TWAP window
    /// starts counting from launch.
    fn prime_oracle(&mut self) -> Result<()> {
        let pair = self.pairs.get(self.main_pair)?;
        let (cum0, cum1) = pair.cumulatives_at(self.now);
        self.twap.update(self.main_pair, cum0, cum1, self.now)?;
        Ok(())
    }

    fn consult_pair(&self, id: PairId, token_in: TokenId, amount: Amount) -> Result<Amount> {
        let pair = self.pairs.get(id)?;
        self.twap.consult(id, token_in == pair.token0, amount)
    }

    fn anchor_quantity(&self, token: TokenId, amount: Amount) -> Result<Amount> {
        let anchor = self.swap_mining.anchor();
        if token == anchor {
            return Ok(amount);
        }
        if self.pairs.exists(token, anchor) {
            let direct = PairId::derive(token, anchor);
            if self.twap.has_price(direct) {
                return self.consult_pair(direct, token, amount);
            }
        }
        // One hop through any whitelisted intermediate with priced legs.
        for mid in self.swap_mining.whitelist_tokens() {
            if mid == token || mid == anchor {
                continue;
            }
            let leg1 = PairId::derive(token, mid);
            let leg2 = PairId::derive(mid, anchor);
            if self.pairs.exists(token, mid)
                && self.pairs.exists(mid, anchor)
                && self.twap.has_price(leg1)
                && self.twap.has_price(leg2)
            {
                let mid_amount = self.consult_pair(leg1, token, amount)?;
                return self.consult_pair(leg2, mid, mid_amount);
            }
        }
        Err(KeelError::NotFound("no oracle route to anchor token".into()))
    }

    fn record_swap_volume(
        &mut self,
        pair: PairId,
        trader: AccountId,
        token_in: TokenId,
        token_out: TokenId,
        amount_out: Amount,
    ) -> Result<()> {
        if !self.swap_mining.is_whitelisted(token_in) || !self.swap_mining.is_whitelisted(token_out)
        {
            return Ok(());
        }
        let quantity = match self.anchor_quantity(token_out, amount_out) {
            Ok(quantity) => quantity,
            Err(KeelError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        match self.swap_mining.record(pair, trader, quantity, self.block)? {
            None => Ok(()),
            Some(settled) => {
                if settled > 0 {
                    self.lock_reward(trader, settled)?;
                }
                let pool = self
                    .swap_mining
                    .pool_of(pair)
                    .ok_or_else(|| KeelError::Internal("volume pool disappeared".into()))?;
                self.push_event(Event::SwapVolume {
                    pool,
                    account: trader,
                    quantity,
                })
            }
        }
    }

    // --- farms ---

    /// Registers a staking pool for `stake_token`. One pool per token.
    pub fn add_farm_pool(
        &mut self,
        caller: AccountId,
        stake_token: TokenId,
        weight: u64,
    ) -> Result<PoolId> {
        self.core.ensure_governor(caller)?;
        if self.stake_tokens.contains(&stake_token) {
            return Err(KeelError::AlreadyDone("pool exists for stake token".into()));
        }
        let pool = self
            .stake_farm
            .add_pool(weight, self.block, self.bounds.max_farm_pools)?;
        self.stake_tokens.push(stake_token);
        self.push_event(Event::FarmPoolAdded {
            kind: FarmKind::Stake,
            pool,
        })?;
        Ok(pool)
    }

    /// Registers a volume pool for an existing pair.
    pub fn add_swap_pool(
        &mut self,
        caller: AccountId,
        token_a: TokenId,
        token_b: TokenId,
        weight: u64,
    ) -> Result<PoolId> {
        self.core.ensure_governor(caller)?;
        let (id, _) = self.pairs.get_by_tokens(token_a, token_b)?;
        let pool = self
            .swap_mining
            .add_pool(id, weight, self.block, self.bounds.max_farm_pools)?;
        self.push_event(Event::FarmPoolAdded {
            kind: FarmKind::Volume,
            pool,
        })?;
        Ok(pool)
    }

    pub fn farm_stake_token(&self, pool: PoolId) -> Result<TokenId> {
        self.stake_token_of(pool)
    }

    fn stake_token_of(&self, pool: PoolId) -> Result<TokenId> {
        self.stake_tokens
            .get(pool.0 as usize)
            .copied()
            .ok_or_else(|| KeelError::NotFound("unknown farm pool".into()))
    }

    /// Stakes `amount` of the pool's token. A zero amount settles pending
    /// rewards without moving stake.
    pub fn farm_deposit(&mut self, caller: AccountId, pool: PoolId, amount: Amount) -> Result<()> {
        let token = self.stake_token_of(pool)?;
        if amount > 0 && self.bank.balance_of(token, caller) < amount {
            return Err(KeelError::InsufficientFunds(
                "insufficient stake balance".into(),
            ));
        }
        let settled = self.stake_farm.add_shares(pool, caller, amount, self.block)?;
        if amount > 0 {
            self.bank.transfer(token, caller, self.farm_account, amount)?;
        }
        if settled > 0 {
            self.lock_reward(caller, settled)?;
        }
        self.push_event(Event::FarmDeposit {
            kind: FarmKind::Stake,
            pool,
            account: caller,
            amount,
        })
    }

    /// Unstakes `amount`, settling rewards first. A zero amount settles
    /// pending rewards without moving stake.
    pub fn farm_withdraw(&mut self, caller: AccountId, pool: PoolId, amount: Amount) -> Result<()> {
        let token = self.stake_token_of(pool)?;
        let settled = self
            .stake_farm
            .remove_shares(pool, caller, amount, self.block)?;
        if amount > 0 {
            self.bank.transfer(token, self.farm_account, caller, amount)?;
        }
        if settled > 0 {
            self.lock_reward(caller, settled)?;
        }
        self.push_event(Event::FarmWithdraw {
            kind: FarmKind::Stake,
            pool,
            account: caller,
            amount,
        })
    }

    /// Returns the caller's full stake and forfeits any pending rewards.
    /// Works regardless of reward accounting state.
    pub fn farm_emergency_withdraw(&mut self, caller: AccountId, pool: PoolId) -> Result<Amount> {
        let token = self.stake_token_of(pool)?;
        let shares = self.stake_farm.remove_all_shares_unsettled(pool, caller)?;
        if shares > 0 {
            self.bank.transfer(token, self.farm_account, caller, shares)?;
        }
        self.push_event(Event::FarmEmergencyWithdraw {
            pool,
            account: caller,
            amount: shares,
        })?;
        Ok(shares)
    }

    pub fn farm_pending(&self, pool: PoolId, account: AccountId) -> Result<Amount> {
        self.stake_farm.pending(pool, account, self.block)
    }

    pub fn farm_shares(&self, pool: PoolId, account: AccountId) -> Result<Amount> {
        self.stake_token_of(pool)?;
        Ok(self.stake_farm.shares(pool, account))
    }

    pub fn set_reward_per_block(
        &mut self,
        caller: AccountId,
        kind: FarmKind,
        reward_per_block: Amount,
    ) -> Result<()> {
        self.core.ensure_governor(caller)?;
        match kind {
            FarmKind::Stake => self
                .stake_farm
                .set_reward_per_block(reward_per_block, self.block)?,
            FarmKind::Volume => self
                .swap_mining
                .rewards_mut()
                .set_reward_per_block(reward_per_block, self.block)?,
        }
        self.push_event(Event::ParamsUpdated {
            what: format!("{kind:?} farm reward per block"),
        })
    }

    pub fn set_farm_end_block(
        &mut self,
        caller: AccountId,
        kind: FarmKind,
        end_block: u64,
    ) -> Result<()> {
        self.core.ensure_governor(caller)?;
        match kind {
            FarmKind::Stake => self.stake_farm.set_end_block(end_block, self.block)?,
            FarmKind::Volume => self
                .swap_mining
                .rewards_mut()
                .set_end_block(end_block, self.block)?,
        }
        self.push_event(Event::ParamsUpdated {
            what: format!("{kind:?} farm end block"),
        })
    }

    pub fn set_farm_pool_weight(
        &mut self,
        caller: AccountId,
        kind: FarmKind,
        pool: PoolId,
        weight: u64,
    ) -> Result<()> {
        self.core.ensure_governor(caller)?;
        match kind {
            FarmKind::Stake => self.stake_farm.set_pool_weight(pool, weight, self.block)?,
            FarmKind::Volume => self
                .swap_mining
                .rewards_mut()
                .set_pool_weight(pool, weight, self.block)?,
        }
        self.push_event(Event::ParamsUpdated {
            what: format!("{kind:?} farm pool {} weight", pool.0),
        })
    }

    // --- swap mining ---

    pub fn add_whitelist(&mut self, caller: AccountId, token: TokenId) -> Result<()> {
        self.core.ensure_governor(caller)?;
        self.swap_mining
            .add_whitelist(token, self.bounds.max_whitelist_tokens)?;
        self.push_event(Event::ParamsUpdated {
            what: format!("whitelisted {}", token.label()),
        })
    }

    pub fn remove_whitelist(&mut self, caller: AccountId, token: TokenId) -> Result<()> {
        self.core.ensure_governor(caller)?;
        self.swap_mining.remove_whitelist(token)?;
        self.push_event(Event::ParamsUpdated {
            what: format!("unwhitelisted {}", token.label()),
        })
    }

    pub fn is_whitelisted(&self, token: TokenId) -> bool {
        self.swap_mining.is_whitelisted(token)
    }

    pub fn swap_pool_of(&self, token_a: TokenId, token_b: TokenId) -> Option<PoolId> {
        self.swap_mining.pool_of(PairId::derive(token_a, token_b))
    }

    pub fn swap_pending(&self, pool: PoolId, account: AccountId) -> Result<Amount> {
        self.swap_mining.rewards().pending(pool, account, self.block)
    }

    /// Settles the caller's recorded volume across all pools into the
    /// vesting ledger and resets it. Returns the gross settled reward.
    pub fn taker_claim(&mut self, caller: AccountId) -> Result<Amount> {
        let settled = self.swap_mining.settle_all(caller, self.block)?;
        if settled > 0 {
            self.lock_reward(caller, settled)?;
        }
        Ok(settled)
    }

    // --- vesting ---

    pub fn current_epoch(&self) -> u64 {
        self.vesting.epoch_of(self.now)
    }

    /// (still locked, claimable now) for `account`.
    pub fn vesting_amounts(&self, account: AccountId) -> Result<(Amount, Amount)> {
        self.vesting.amounts(account, self.now)
    }

    /// Pays out every released tranche slice for the caller.
    pub fn claim(&mut self, caller: AccountId) -> Result<Amount> {
        let amount = self.vesting.claim(caller, self.now)?;
        if amount > 0 {
            self.bank
                .transfer(TokenId::Gov, self.vesting_account, caller, amount)?;
        }
        debug!(amount = %amount, "vesting claim");
        self.push_event(Event::Claimed {
            account: caller,
            amount,
        })?;
        Ok(amount)
    }

    /// Mints `amount` of governance into vesting custody and locks it for
    /// `account` in the current epoch's tranche.
    fn lock_reward(&mut self, account: AccountId, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let epoch = self.vesting.lock(account, self.now, amount)?;
        self.bank.mint(TokenId::Gov, self.vesting_account, amount)?;
        self.push_event(Event::RewardLocked {
            account,
            epoch,
            amount,
        })
    }

    // --- redemption ---

    pub fn redeem_amount_out(&self, amount_in: Amount) -> Result<Amount> {
        self.redemption.amount_out(amount_in)
    }

    /// Burns stablecoin and mints governance at the fixed redemption ratio.
    ///
    /// Preconditions: unit not paused; launched; `deadline` not passed;
    /// `amount_in` > 0; output meets `min_amount_out`; caller holds the
    /// stablecoin.
    pub fn redeem_purchase(
        &mut self,
        caller: AccountId,
        to: AccountId,
        amount_in: Amount,
        min_amount_out: Amount,
        deadline: u64,
    ) -> Result<Amount> {
        self.core.ensure_not_paused(Component::RedemptionUnit)?;
        self.core.ensure_launched()?;
        if self.now > deadline {
            return Err(KeelError::Timing("deadline expired".into()));
        }
        if amount_in == 0 {
            return Err(KeelError::InvalidInput("no value sent".into()));
        }
        let amount_out = self.redemption.amount_out(amount_in)?;
        if amount_out < min_amount_out {
            return Err(KeelError::Slippage("output below minimum".into()));
        }
        if self.bank.balance_of(TokenId::Stable, caller) < amount_in {
            return Err(KeelError::InsufficientFunds(
                "insufficient stablecoin balance".into(),
            ));
        }

        // Commit.
        self.bank.burn(TokenId::Stable, caller, amount_in)?;
        self.bank.mint(TokenId::Gov, to, amount_out)?;
        self.push_event(Event::RedeemPurchase {
            to,
            amount_in,
            amount_out,
        })?;
        Ok(amount_out)
    }

    // --- treasury (pcv) ---

    /// Registers a new treasury deposit and returns its id.
    pub fn add_treasury_deposit(&mut self, caller: AccountId) -> Result<DepositId> {
        self.core.ensure_governor(caller)?;
        let id = self.deposits.add(self.bounds.max_deposits)?;
        self.contract_accounts.insert(pcv::deposit_account(id));
        self.push_event(Event::DepositAdded { deposit: id })?;
        Ok(id)
    }

    pub fn treasury_deposit_account(&self, deposit: DepositId) -> Result<AccountId> {
        Ok(self.deposits.get(deposit)?.account)
    }

    pub fn treasury_deposit_ids(&self) -> Vec<DepositId> {
        self.deposits.ids().collect()
    }

    /// Pairs reserve already held by `deposit` into the main pool.
    /// Permissionless trigger; the deposit is funded beforehand with an
    /// ordinary transfer to its account.
    pub fn pcv_deposit(&mut self, deposit: DepositId, amount: Amount) -> Result<()> {
        self.core.ensure_not_paused(Component::TreasuryDeposit)?;
        self.core.ensure_launched()?;
        let account = self.deposits.get(deposit)?.account;
        if amount == 0 {
            return Err(KeelError::InvalidInput("no value sent".into()));
        }
        if self.bank.balance_of(TokenId::Reserve, account) < amount {
            return Err(KeelError::InsufficientFunds(
                "insufficient deposit balance".into(),
            ));
        }
        let price = self.price_source.latest_price()?;
        self.deposit_to_pool(deposit, amount, price)?;
        Ok(())
    }

    /// Moves unpooled reserve out of a deposit. Deliberately not gated on
    /// pause so funds can leave during an incident.
    pub fn pcv_withdraw(
        &mut self,
        caller: AccountId,
        deposit: DepositId,
        to: AccountId,
        amount: Amount,
    ) -> Result<()> {
        self.core.ensure_pcv_controller(caller)?;
        let account = self.deposits.get(deposit)?.account;
        if amount == 0 {
            return Err(KeelError::InvalidInput("no value sent".into()));
        }
        self.bank.transfer(TokenId::Reserve, account, to, amount)?;
        self.push_event(Event::PcvWithdrawn {
            deposit,
            to,
            amount,
        })
    }

    /// Drains a deposit's entire unpooled reserve. Not gated on pause.
    pub fn pcv_force_withdraw(
        &mut self,
        caller: AccountId,
        deposit: DepositId,
        to: AccountId,
    ) -> Result<Amount> {
        self.core.ensure_pcv_controller(caller)?;
        let account = self.deposits.get(deposit)?.account;
        let amount = self.bank.balance_of(TokenId::Reserve, account);
        if amount > 0 {
            self.bank.transfer(TokenId::Reserve, account, to, amount)?;
        }
        self.push_event(Event::PcvWithdrawn {
            deposit,
            to,
            amount,
        })?;
        Ok(amount)
    }

    /// Unwinds protocol-owned liquidity: burns the deposit's LP, keeps the
    /// reserve side in the deposit, and burns the stablecoin side so it
    /// leaves circulation.
    pub fn pcv_remove_liquidity(
        &mut self,
        caller: AccountId,
        deposit: DepositId,
        liquidity: Amount,
        min_reserve: Amount,
        min_stable: Amount,
    ) -> Result<(Amount, Amount)> {
        self.core.ensure_not_paused(Component::TreasuryDeposit)?;
        self.core.ensure_pcv_controller(caller)?;
        let account = self.deposits.get(deposit)?.account;
        let (reserve_out, stable_out) = self.pairs.remove_liquidity(
            &mut self.bank,
            account,
            TokenId::Reserve,
            TokenId::Stable,
            liquidity,
            min_reserve,
            min_stable,
            self.now,
        )?;
        self.bank.burn(TokenId::Stable, account, stable_out)?;
        self.push_event(Event::PcvLiquidityRemoved {
            deposit,
            liquidity,
            reserve_out,
            stable_burned: stable_out,
        })?;
        Ok((reserve_out, stable_out))
    }

    /// Stakes a deposit's LP tokens into a farm pool. Settled rewards are
    /// harvested straight to the treasury, not vested.
    pub fn pcv_deposit_lp_mining(
        &mut self,
        caller: AccountId,
        deposit: DepositId,
        pool: PoolId,
        amount: Amount,
    ) -> Result<()> {
        self.core.ensure_not_paused(Component::TreasuryDeposit)?;
        self.core.ensure_pcv_controller(caller)?;
        let account = self.deposits.get(deposit)?.account;
        let token = self.stake_token_of(pool)?;
        if amount == 0 {
            return Err(KeelError::InvalidInput("no value sent".into()));
        }
        if self.bank.balance_of(token, account) < amount {
            return Err(KeelError::InsufficientFunds(
                "insufficient stake balance".into(),
            ));
        }
        let settled = self.stake_farm.add_shares(pool, account, amount, self.block)?;
        self.bank.transfer(token, account, self.farm_account, amount)?;
        if settled > 0 {
            self.harvest_to_treasury(deposit, settled)?;
        }
        self.push_event(Event::FarmDeposit {
            kind: FarmKind::Stake,
            pool,
            account,
            amount,
        })
    }

    /// Unstakes a deposit's LP tokens from a farm pool.
    pub fn pcv_withdraw_lp_mining(
        &mut self,
        caller: AccountId,
        deposit: DepositId,
        pool: PoolId,
        amount: Amount,
    ) -> Result<()> {
        self.core.ensure_not_paused(Component::TreasuryDeposit)?;
        self.core.ensure_pcv_controller(caller)?;
        let account = self.deposits.get(deposit)?.account;
        let token = self.stake_token_of(pool)?;
        let settled = self
            .stake_farm
            .remove_shares(pool, account, amount, self.block)?;
        if amount > 0 {
            self.bank.transfer(token, self.farm_account, account, amount)?;
        }
        if settled > 0 {
            self.harvest_to_treasury(deposit, settled)?;
        }
        self.push_event(Event::FarmWithdraw {
            kind: FarmKind::Stake,
            pool,
            account,
            amount,
        })
    }

    /// Settles a deposit's farm rewards to the treasury without moving stake.
    pub fn pcv_harvest(
        &mut self,
        caller: AccountId,
        deposit: DepositId,
        pool: PoolId,
    ) -> Result<Amount> {
        self.core.ensure_not_paused(Component::TreasuryDeposit)?;
        self.core.ensure_pcv_controller(caller)?;
        let account = self.deposits.get(deposit)?.account;
        self.stake_token_of(pool)?;
        let settled = self.stake_farm.settle(pool, account, self.block)?;
        self.harvest_to_treasury(deposit, settled)?;
        Ok(settled)
    }

    fn harvest_to_treasury(&mut self, deposit: DepositId, amount: Amount) -> Result<()> {
        if amount > 0 {
            self.bank.mint(TokenId::Gov, self.treasury, amount)?;
        }
        self.push_event(Event::Harvested { deposit, amount })
    }

    // --- invariants ---

    /// Runs every global consistency check and returns all violations.
    /// An empty result means committed state is coherent.
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        violations.extend(invariants::check_bank_conservation(&self.bank));
        violations.extend(invariants::check_pair_backing(&self.pairs, &self.bank));

        if !self.stake_farm.shares_consistent() {
            violations.push(InvariantViolation::new(
                InvariantId::FarmSharesConsistent,
                "stake farm pool totals diverge from user positions",
            ));
        }
        if !self.swap_mining.rewards().shares_consistent() {
            violations.push(InvariantViolation::new(
                InvariantId::FarmSharesConsistent,
                "volume farm pool totals diverge from user positions",
            ));
        }

        // Staked custody is exact: one stake token per pool, held 1:1.
        for (index, token) in self.stake_tokens.iter().enumerate() {
            let pool = PoolId(index as u32);
            match self.stake_farm.total_shares(pool) {
                Ok(staked) => {
                    let held = self.bank.balance_of(*token, self.farm_account);
                    if held != staked {
                        violations.push(InvariantViolation::new(
                            InvariantId::StakeCustody,
                            format!(
                                "pool {}: farm holds {held} of {} but records {staked} staked",
                                pool.0,
                                token.label()
                            ),
                        ));
                    }
                }
                Err(err) => violations.push(InvariantViolation::new(
                    InvariantId::StakeCustody,
                    format!("pool {}: {err}", pool.0),
                )),
            }
        }

        self.check_auction_custody(&mut violations);

        match self.vesting.total_outstanding() {
            Ok(outstanding) => {
                let held = self.bank.balance_of(TokenId::Gov, self.vesting_account);
                if held != outstanding {
                    violations.push(InvariantViolation::new(
                        InvariantId::VestingCustody,
                        format!("vesting holds {held} gov but owes {outstanding}"),
                    ));
                }
            }
            Err(err) => violations.push(InvariantViolation::new(
                InvariantId::VestingCustody,
                err.to_string(),
            )),
        }

        if let Err(err) = self.events.verify() {
            violations.push(InvariantViolation::new(
                InvariantId::EventChainValid,
                err.to_string(),
            ));
        }
        violations
    }

    fn check_auction_custody(&self, violations: &mut Vec<InvariantViolation>) {
        let expect = |current: Amount, paid: Amount| current.checked_sub(paid);
        let (reserve_expected, stable_expected, gov_expected) = if self.genesis.launched() {
            let reserve = self
                .genesis
                .total_committed()
                .checked_sub(self.genesis.total_effective())
                .and_then(|rest| rest.checked_sub(self.genesis.refunds_paid()));
            (
                reserve,
                expect(self.genesis.minted_stable(), self.genesis.stable_paid()),
                expect(
                    self.genesis.minted_governance(),
                    self.genesis.governance_paid(),
                ),
            )
        } else {
            (Some(self.genesis.total_committed()), Some(0), Some(0))
        };

        let checks = [
            (TokenId::Reserve, reserve_expected),
            (TokenId::Stable, stable_expected),
            (TokenId::Gov, gov_expected),
        ];
        for (token, expected) in checks {
            let held = self.bank.balance_of(token, self.auction_account);
            match expected {
                Some(expected) if expected == held => {}
                Some(expected) => violations.push(InvariantViolation::new(
                    InvariantId::AuctionCustody,
                    format!(
                        "auction holds {held} {} but accounting expects {expected}",
                        token.label()
                    ),
                )),
                None => violations.push(InvariantViolation::new(
                    InvariantId::AuctionCustody,
                    format!("auction {} accounting underflows", token.label()),
                )),
            }
        }
    }
}
