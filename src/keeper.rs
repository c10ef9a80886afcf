/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The keeper loop, which ties every other component together once per tick, and the [`Keeper`] handle to
//! the thread it runs on.
//!
//! ## Starting a keeper
//!
//! Build a [`KeeperSpec`], either piece by piece with [`KeeperSpec::builder`] (tests plug in in-memory
//! collaborators this way) or from an operator configuration with [`KeeperSpec::from_config`], then call
//! [`start`](KeeperSpec::start):
//!
//! ```ignore
//! let keeper = KeeperSpec::from_config(&config, &Environment::from_env(), tasks_path, abi_dir)?.start();
//! keeper.join();
//! ```
//!
//! ## A tick
//!
//! Each tick runs, strictly in order:
//! 1. Refresh the [committee view](crate::management). If this fails, skip to step 6 with the last-known-good
//!    view left in place.
//! 2. Resolve this node's guardian identity from the view's topology. A node that is not in the topology yet
//!    is "not provisioned": it cannot lead and executes nothing.
//! 3. Re-evaluate [leadership](crate::leader) for the current epoch.
//! 4. Refresh the sender's balance on every network, for the status document.
//! 5. If this keeper leads, execute every due task in declaration order. Within a task, networks, contract
//!    addresses, methods, and parameter sets are walked in declaration order too, one
//!    [transaction](crate::tx) at a time. A failing call or task is recorded and the tick moves on.
//! 6. Update the [status](crate::status) and write it out.
//!
//! Then the loop sleeps until the next multiple of the tick interval, waking early only to shut down. A
//! panic inside a tick is caught at the tick boundary and recorded like any other tick failure: one bad tick
//! never ends the process.

use std::{
    any::Any,
    collections::{BTreeMap, HashSet},
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use typed_builder::TypedBuilder;

use crate::{
    bi_sink::BiSink,
    chain::{
        abi::{Abi, AbiError, AbiStore},
        rpc::JsonRpcClient,
        ChainClient, ChainError,
    },
    config::{ConfigError, Environment, KeeperConfig},
    epoch_clock::{EpochClock, EpochClockError},
    event_bus::{start_event_bus, EventHandlers, HandlerPtr},
    events::*,
    leader::{LeaderElection, LeaderState},
    management::{CommitteeSource, CommitteeTracker, HttpManagementClient, ManagementError},
    scheduler::TaskScheduler,
    signer::{local::LocalSigner, remote::RemoteSigner, SignerError, TxSigner},
    status::{
        rfc3339, status_text, uptime_text, FileStatusSink, Status, StatusDocument, StatusPayload,
        StatusSink, Version,
    },
    tx::{ContractCall, TransactionLifecycle, TxError, TxLifecycleConfig},
    types::{
        committee::{CommitteeMember, CommitteeView},
        data_types::{DwellLength, EpochIndex, EthAddress, OrbsAddress},
        task::{load_tasks, ParamSet, TaskDefinition, TaskFileError},
    },
};

/// Chain clients keyed by the network names tasks use.
pub type ChainClients = BTreeMap<String, Box<dyn ChainClient>>;

#[derive(TypedBuilder)]
pub struct KeeperSpec {
    epoch_clock: EpochClock,
    dwell_length: DwellLength,
    node_orbs_address: OrbsAddress,
    tasks: Vec<TaskDefinition>,
    abis: AbiStore,
    #[builder(setter(transform = |source: impl CommitteeSource + 'static| Box::new(source) as Box<dyn CommitteeSource>))]
    committee_source: Box<dyn CommitteeSource>,
    chains: ChainClients,
    #[builder(setter(transform = |signer: impl TxSigner + 'static| Box::new(signer) as Box<dyn TxSigner>))]
    signer: Box<dyn TxSigner>,
    #[builder(setter(transform = |sink: impl StatusSink + 'static| Box::new(sink) as Box<dyn StatusSink>))]
    status_sink: Box<dyn StatusSink>,
    tx_config: TxLifecycleConfig,
    #[builder(default = false,
    setter(doc = "Always consider this keeper the leader. Debug mode only. Optional."))]
    force_leader: bool,
    #[builder(default = Duration::from_secs(60))]
    tick_interval: Duration,
    #[builder(default = 1)]
    status_write_every_ticks: u64,
    #[builder(default = true)]
    log_events: bool,
    #[builder(default)]
    bi_sink: Option<BiSink>,
    #[builder(default, setter(transform = |handler: impl Fn(&LeaderChangedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<LeaderChangedEvent>),
    doc = "Register a handler closure to be invoked after the leader or this keeper's role changes. Optional."))]
    on_leader_changed: Option<HandlerPtr<LeaderChangedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitteeRefreshedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitteeRefreshedEvent>),
    doc = "Register a handler closure to be invoked after the committee view is refreshed. Optional."))]
    on_committee_refreshed: Option<HandlerPtr<CommitteeRefreshedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitteeRefreshFailedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitteeRefreshFailedEvent>),
    doc = "Register a handler closure to be invoked after a committee refresh fails. Optional."))]
    on_committee_refresh_failed: Option<HandlerPtr<CommitteeRefreshFailedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ExecTaskEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ExecTaskEvent>),
    doc = "Register a handler closure to be invoked after a due task is executed. Optional."))]
    on_exec_task: Option<HandlerPtr<ExecTaskEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendTxEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendTxEvent>),
    doc = "Register a handler closure to be invoked after a contract call reaches its final outcome. Optional."))]
    on_send_tx: Option<HandlerPtr<SendTxEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TickFailedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TickFailedEvent>),
    doc = "Register a handler closure to be invoked after a tick records errors. Optional."))]
    on_tick_failed: Option<HandlerPtr<TickFailedEvent>>,
}

impl KeeperSpec {
    /// Assemble a spec from an operator configuration: load the ABIs and the task list, and create the HTTP
    /// collaborators.
    pub fn from_config(
        config: &KeeperConfig,
        environment: &Environment,
        tasks_path: &Path,
        abi_dir: &Path,
    ) -> Result<KeeperSpec, KeeperError> {
        config.validate()?;
        let timeout = config.http_timeout();
        let epoch_clock = EpochClock::new(config.epoch_duration())?;
        let node_orbs_address = config.node_orbs_address()?;

        let abis = AbiStore::load_dir(abi_dir)?;
        let known_networks: HashSet<String> = config.networks.keys().cloned().collect();
        let tasks = load_tasks(tasks_path, config.epoch_duration(), &known_networks, &abis)?;
        log::info!(
            "loaded {} tasks ({} active) and {} ABIs",
            tasks.len(),
            tasks.iter().filter(|task| task.active).count(),
            abis.len()
        );

        let mut chains = ChainClients::new();
        for (name, network) in &config.networks {
            let mut client = JsonRpcClient::new(&network.rpc_endpoint, timeout).map_err(|source| {
                KeeperError::Chain {
                    network: name.clone(),
                    source,
                }
            })?;
            match client.chain_id() {
                Ok(chain_id) => log::info!("network {} has chain id {}", name, chain_id),
                Err(err) => log::warn!("network {}: chain id not available yet: {}", name, err),
            }
            chains.insert(name.clone(), Box::new(client));
        }

        let signer: Box<dyn TxSigner> = if environment.debug {
            let key = environment
                .debug_private_key
                .as_deref()
                .ok_or(KeeperError::MissingDebugKey)?;
            let signer = LocalSigner::from_hex(key)?;
            log::warn!("debug mode: always leading, signing locally as {}", signer.sender());
            Box::new(signer)
        } else {
            Box::new(RemoteSigner::new(&config.signer_endpoint, timeout)?)
        };
        if !environment.production {
            log::warn!("not in production: transactions are signed and logged, never broadcast");
        }

        let bi_sink = config
            .bi_url
            .as_deref()
            .map(|url| BiSink::new(url, &config.node_orbs_address, timeout))
            .transpose()
            .map_err(|err| KeeperError::Bi(err.to_string()))?;

        Ok(KeeperSpec {
            epoch_clock,
            dwell_length: DwellLength::new(config.dwell_length),
            node_orbs_address,
            tasks,
            abis,
            committee_source: Box::new(HttpManagementClient::new(
                &config.management_service_endpoint,
                timeout,
            )?),
            chains,
            signer,
            status_sink: Box::new(FileStatusSink::new(config.status_json_path.clone())),
            tx_config: config.tx_lifecycle_config(!environment.production),
            force_leader: environment.debug,
            tick_interval: config.run_loop_poll_time(),
            status_write_every_ticks: config.status_write_every_ticks,
            log_events: config.log_events,
            bi_sink,
            on_leader_changed: None,
            on_committee_refreshed: None,
            on_committee_refresh_failed: None,
            on_exec_task: None,
            on_send_tx: None,
            on_tick_failed: None,
        })
    }

    /// Build the keeper loop without starting any thread, to drive ticks by hand. Registered event handlers
    /// are not used.
    pub fn into_keeper_loop(self) -> KeeperLoop {
        self.into_parts(None).0
    }

    /// Start the keeper thread and, if any event handler is enabled, the event bus thread.
    pub fn start(self) -> Keeper {
        let (keeper_loop, event_handlers) = {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (keeper_loop, event_handlers) = self.into_parts(Some(event_publisher));
            (keeper_loop, event_handlers.map(|handlers| (handlers, event_subscriber)))
        };

        let (event_bus, event_bus_shutdown) = match event_handlers {
            Some((handlers, event_subscriber)) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus =
                    start_event_bus(handlers, event_subscriber, event_bus_shutdown_receiver);
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        let (keeper_shutdown, keeper_shutdown_receiver) = mpsc::channel();
        let keeper_thread = start_keeper_thread(keeper_loop, keeper_shutdown_receiver);

        Keeper {
            keeper_thread: Some(keeper_thread),
            keeper_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }

    /// Split into the keeper loop and the event handlers. The loop only publishes events if there is a
    /// handler for them.
    fn into_parts(self, event_publisher: Option<Sender<Event>>) -> (KeeperLoop, Option<EventHandlers>) {
        let event_handlers = EventHandlers::new(
            self.log_events,
            self.bi_sink.as_ref(),
            self.on_leader_changed,
            self.on_committee_refreshed,
            self.on_committee_refresh_failed,
            self.on_exec_task,
            self.on_send_tx,
            self.on_tick_failed,
        );
        let (event_publisher, event_handlers) = if event_handlers.is_empty() {
            (None, None)
        } else {
            (event_publisher, Some(event_handlers))
        };

        let keeper_loop = KeeperLoop {
            tasks: self.tasks,
            abis: self.abis,
            committee_source: self.committee_source,
            chains: self.chains,
            signer: self.signer,
            status_sink: self.status_sink,
            tick_interval: self.tick_interval,
            status_write_every_ticks: self.status_write_every_ticks.max(1),
            state: KeeperState {
                epoch_clock: self.epoch_clock,
                node_orbs_address: self.node_orbs_address,
                epoch_index: EpochIndex::new(0),
                committee: CommitteeTracker::new(),
                guardian: None,
                leader_election: LeaderElection::new(
                    self.dwell_length,
                    self.force_leader,
                    event_publisher.clone(),
                ),
                scheduler: TaskScheduler::new(),
                lifecycle: TransactionLifecycle::new(self.tx_config, event_publisher.clone()),
                status: Status::new(SystemTime::now()),
            },
            event_publisher,
        };
        (keeper_loop, event_handlers)
    }
}

/// State that a keeper carries across ticks. Per-tick values (gas prices, the sender address) are never
/// stored here.
pub struct KeeperState {
    epoch_clock: EpochClock,
    node_orbs_address: OrbsAddress,
    epoch_index: EpochIndex,
    committee: CommitteeTracker,
    /// This node's topology entry as resolved in the last tick that refreshed the view.
    guardian: Option<CommitteeMember>,
    leader_election: LeaderElection,
    scheduler: TaskScheduler,
    lifecycle: TransactionLifecycle,
    status: Status,
}

impl KeeperState {
    pub fn epoch_index(&self) -> EpochIndex {
        self.epoch_index
    }

    pub fn committee_view(&self) -> std::sync::Arc<CommitteeView> {
        self.committee.view()
    }

    pub fn guardian(&self) -> Option<&CommitteeMember> {
        self.guardian.as_ref()
    }

    pub fn leader_state(&self) -> &LeaderState {
        self.leader_election.state()
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn lifecycle(&self) -> &TransactionLifecycle {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut TransactionLifecycle {
        &mut self.lifecycle
    }

    pub fn status(&self) -> &Status {
        &self.status
    }
}

/// What one tick did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub epoch_index: EpochIndex,
    pub is_leader: bool,
    /// Tasks executed in this tick, in execution order.
    pub executed_tasks: Vec<String>,
    /// Due tasks that could not start this tick. They stay due and are retried on the next tick.
    pub blocked_tasks: Vec<String>,
    pub errors: Vec<String>,
    pub status_written: bool,
}

pub struct KeeperLoop {
    tasks: Vec<TaskDefinition>,
    abis: AbiStore,
    committee_source: Box<dyn CommitteeSource>,
    chains: ChainClients,
    signer: Box<dyn TxSigner>,
    status_sink: Box<dyn StatusSink>,
    tick_interval: Duration,
    status_write_every_ticks: u64,
    state: KeeperState,
    event_publisher: Option<Sender<Event>>,
}

impl KeeperLoop {
    pub fn state(&self) -> &KeeperState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut KeeperState {
        &mut self.state
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn tick(&mut self) -> TickReport {
        self.tick_at(SystemTime::now())
    }

    /// Run one tick as if the wall clock read `now`.
    pub fn tick_at(&mut self, now: SystemTime) -> TickReport {
        let tick = self.state.status.start_tick();
        let epoch = self.state.epoch_clock.epoch_index_at(now);
        self.state.epoch_index = epoch;
        let mut report = TickReport {
            tick,
            epoch_index: epoch,
            is_leader: false,
            executed_tasks: Vec::new(),
            blocked_tasks: Vec::new(),
            errors: Vec::new(),
            status_written: false,
        };

        // 1. Refresh the committee view. On failure keep the old one and go straight to reporting.
        let refreshed = match self
            .state
            .committee
            .refresh(self.committee_source.as_mut(), now)
        {
            Ok(view) => {
                Event::CommitteeRefreshed(CommitteeRefreshedEvent {
                    timestamp: SystemTime::now(),
                    committee_size: view.len(),
                    ref_time: view.ref_time(),
                    ref_block: view.ref_block(),
                })
                .publish(&self.event_publisher);
                true
            }
            Err(err) => {
                log::warn!("committee refresh failed, keeping the previous view: {}", err);
                Event::CommitteeRefreshFailed(CommitteeRefreshFailedEvent {
                    timestamp: SystemTime::now(),
                    consecutive_failures: self.state.committee.consecutive_failures(),
                    error: err.to_string(),
                })
                .publish(&self.event_publisher);
                report.errors.push(format!("committee refresh: {}", err));
                false
            }
        };

        if refreshed {
            self.lead(epoch, &mut report);
        }
        report.is_leader = self.state.leader_election.state().is_leader;

        // 6. Report.
        self.finish_tick(now, &mut report);
        report
    }

    /// Steps 2 to 5 of a tick.
    fn lead(&mut self, epoch: EpochIndex, report: &mut TickReport) {
        // 2. Resolve this node's guardian identity.
        let view = self.state.committee.view();
        self.state.guardian = view.guardian(&self.state.node_orbs_address).cloned();
        let guardian_address = self.state.guardian.as_ref().map(|guardian| guardian.eth_address);
        if guardian_address.is_none() {
            log::info!(
                "node {} is not in the topology yet",
                self.state.node_orbs_address
            );
        }

        // 3. Leadership.
        self.state.leader_election.evaluate(
            &view,
            epoch,
            guardian_address,
            &mut self.state.scheduler,
        );
        let is_leader = self.state.leader_election.state().is_leader;

        // 4. Balances.
        let sender = self.signer.address().or(guardian_address);
        if let Some(sender) = sender {
            for (network, chain) in self.chains.iter_mut() {
                match chain.balance(&sender) {
                    Ok(balance) => self.state.status.set_balance(network, balance),
                    Err(err) => log::warn!("balance of {} on {}: {}", sender, network, err),
                }
            }
        }

        if !is_leader {
            return;
        }

        // 5. Due tasks, in declaration order.
        let mut context = TaskContext {
            abis: &self.abis,
            chains: &mut self.chains,
            signer: self.signer.as_mut(),
            lifecycle: &mut self.state.lifecycle,
        };
        for task in &self.tasks {
            if !self.state.scheduler.should_run(task, epoch) {
                continue;
            }
            let started = match sender {
                Some(sender) => context.execute_task(task, sender, epoch),
                None => Err(TaskError::NoSender {
                    task: task.name.clone(),
                }),
            };
            let (calls, errors) = match started {
                Ok(outcome) => outcome,
                Err(err) => {
                    log::warn!("{}", err);
                    report.blocked_tasks.push(task.name.clone());
                    report.errors.push(err.to_string());
                    continue;
                }
            };
            self.state.scheduler.mark_run(&task.name, epoch);

            Event::ExecTask(ExecTaskEvent {
                timestamp: SystemTime::now(),
                task_name: task.name.clone(),
                epoch_index: epoch,
                calls,
                failures: errors.len(),
            })
            .publish(&self.event_publisher);
            report.executed_tasks.push(task.name.clone());
            report.errors.extend(errors);
        }
    }

    fn finish_tick(&mut self, now: SystemTime, report: &mut TickReport) {
        let failed = !report.errors.is_empty();
        if failed {
            let error = report.errors.join("; ");
            log::error!("tick {} finished with errors: {}", report.tick, error);
            Event::TickFailed(TickFailedEvent {
                timestamp: SystemTime::now(),
                tick: report.tick,
                error: error.clone(),
            })
            .publish(&self.event_publisher);
            self.state.status.record_error(error);
        } else {
            self.state.status.clear_error();
        }

        if failed || report.tick % self.status_write_every_ticks == 0 {
            report.status_written = self.write_status(now);
        }
    }

    /// Record a tick that panicked, and report it.
    fn record_panic(&mut self, now: SystemTime, message: String) {
        let tick = self.state.status.tick_count();
        let mut report = TickReport {
            tick,
            epoch_index: self.state.epoch_index,
            is_leader: self.state.leader_election.state().is_leader,
            executed_tasks: Vec::new(),
            blocked_tasks: Vec::new(),
            errors: vec![format!("tick panicked: {}", message)],
            status_written: false,
        };
        self.finish_tick(now, &mut report);
    }

    fn write_status(&mut self, now: SystemTime) -> bool {
        let document = self.status_document(now);
        match self.status_sink.write(&document) {
            Ok(()) => true,
            Err(err) => {
                log::error!("{}", err);
                false
            }
        }
    }

    /// The status document as of `now`.
    pub fn status_document(&self, now: SystemTime) -> StatusDocument {
        let state = &self.state;
        let view = state.committee.view();
        let leader = state.leader_election.state();
        let guardian = state.guardian.as_ref();
        let my_eth_address: Option<EthAddress> = self
            .signer
            .address()
            .or(guardian.map(|guardian| guardian.eth_address));
        let uptime = state.status.uptime(now);

        StatusDocument {
            status: status_text(state.status.tick_count(), leader.leader_name()),
            timestamp: rfc3339(now),
            error: state.status.last_error().map(str::to_string),
            payload: StatusPayload {
                uptime: uptime.as_secs(),
                uptime_text: uptime_text(uptime),
                service_launch_time: rfc3339(state.status.launch_time()),
                version: Version::default(),
                tick_count: state.status.tick_count(),
                epoch_index: state.epoch_index,
                is_leader: leader.is_leader,
                leader_index: leader.leader_index,
                leader_name: leader.leader_name().map(str::to_string),
                my_eth_address,
                my_node_name: guardian.map(|guardian| guardian.name.clone()),
                in_committee: guardian
                    .map_or(false, |guardian| view.in_committee(&guardian.eth_address)),
                management_ref_time: view.ref_time(),
                management_ref_block: view.ref_block(),
                management_last_poll_time: (view.last_poll_time() != UNIX_EPOCH)
                    .then(|| rfc3339(view.last_poll_time())),
                management_staleness_seconds: state
                    .committee
                    .staleness(now)
                    .map(|staleness| staleness.as_secs()),
                balances: state
                    .status
                    .balances()
                    .iter()
                    .map(|(network, balance)| (network.clone(), balance.to_string()))
                    .collect(),
                success_tx: state
                    .lifecycle
                    .outcomes()
                    .successes()
                    .map(ToString::to_string)
                    .collect(),
                fail_tx: state
                    .lifecycle
                    .outcomes()
                    .failures()
                    .map(ToString::to_string)
                    .collect(),
                recent_errors: state.status.recent_errors().cloned().collect(),
                pending_tx: state.lifecycle.pending().iter().cloned().collect(),
            },
        }
    }
}

/// Borrowed collaborators of task execution.
struct TaskContext<'a> {
    abis: &'a AbiStore,
    chains: &'a mut ChainClients,
    signer: &'a mut dyn TxSigner,
    lifecycle: &'a mut TransactionLifecycle,
}

impl<'a> TaskContext<'a> {
    /// Execute every call of `task`, sent from `sender`. Returns the number of calls attempted and the
    /// errors of the ones that failed, or an error if the task cannot start at all: its ABI is missing, or
    /// one of its calls still has a transaction in flight.
    fn execute_task(
        &mut self,
        task: &TaskDefinition,
        sender: EthAddress,
        epoch: EpochIndex,
    ) -> Result<(usize, Vec<String>), TaskError> {
        let abi = self.abis.get(&task.abi).ok_or_else(|| TaskError::UnknownAbi {
            task: task.name.clone(),
            abi: task.abi.clone(),
        })?;
        if self.lifecycle.pending().has_task(&task.name) {
            return Err(TaskError::CallPending {
                task: task.name.clone(),
            });
        }

        log::info!("executing task {} in epoch {}", task.name, epoch);
        let mut calls = 0;
        let mut errors = Vec::new();

        for network in &task.networks {
            let Some(chain) = self.chains.get_mut(network) else {
                let err = TaskError::UnknownNetwork {
                    task: task.name.clone(),
                    network: network.clone(),
                };
                log::error!("{}", err);
                errors.push(err.to_string());
                continue;
            };

            for contract_address in &task.addresses {
                for call in &task.send {
                    for params in call.param_sets() {
                        calls += 1;
                        let result = encode_call(abi, task, network, *contract_address, &call.method, params)
                            .and_then(|contract_call| {
                                send_call(
                                    &mut *self.lifecycle,
                                    &mut *self.signer,
                                    &mut **chain,
                                    &contract_call,
                                    sender,
                                    epoch,
                                )
                            });
                        if let Err(err) = result {
                            log::error!("{}", err);
                            errors.push(err.to_string());
                        }
                    }
                }
            }
        }
        Ok((calls, errors))
    }
}

fn encode_call(
    abi: &Abi,
    task: &TaskDefinition,
    network: &str,
    contract_address: EthAddress,
    method: &str,
    params: ParamSet,
) -> Result<ContractCall, TaskError> {
    let data = abi
        .encode_call(method, &params)
        .map_err(|source| TaskError::Abi {
            task: task.name.clone(),
            method: method.to_string(),
            source,
        })?;
    Ok(ContractCall {
        task_name: task.name.clone(),
        network: network.to_string(),
        contract_address,
        method: method.to_string(),
        params,
        data,
    })
}

fn send_call(
    lifecycle: &mut TransactionLifecycle,
    signer: &mut dyn TxSigner,
    chain: &mut dyn ChainClient,
    contract_call: &ContractCall,
    sender: EthAddress,
    epoch: EpochIndex,
) -> Result<(), TaskError> {
    lifecycle
        .complete_tx(chain, signer, contract_call, sender, epoch)
        .map(|_| ())
        .map_err(|source| TaskError::Tx {
            task: contract_call.task_name.clone(),
            method: contract_call.method.clone(),
            source,
        })
}

fn start_keeper_thread(mut keeper_loop: KeeperLoop, shutdown_signal: Receiver<()>) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        let now = SystemTime::now();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| keeper_loop.tick_at(now))) {
            let message = panic_message(payload.as_ref());
            log::error!("tick panicked: {}", message);
            keeper_loop.record_panic(SystemTime::now(), message);
        }

        let sleep = time_to_next_tick(SystemTime::now(), keeper_loop.tick_interval());
        match shutdown_signal.recv_timeout(sleep) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => (),
        }
    })
}

/// Time from `now` until the next multiple of `interval` since the Unix epoch, so that keepers with the
/// same interval tick together.
pub fn time_to_next_tick(now: SystemTime, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis();
    if interval_ms == 0 {
        return Duration::ZERO;
    }
    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_millis())
        .unwrap_or(0);
    let remaining_ms = interval_ms - now_ms % interval_ms;
    Duration::from_millis(remaining_ms as u64)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A handle to the background threads of a keeper. When this value is dropped, all background threads are
/// gracefully shut down.
pub struct Keeper {
    keeper_thread: Option<JoinHandle<()>>,
    keeper_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Keeper {
    /// Block until the keeper thread exits. Under normal operation it never does.
    pub fn join(mut self) {
        if let Some(keeper_thread) = self.keeper_thread.take() {
            if keeper_thread.join().is_err() {
                log::error!("keeper thread panicked");
            }
        }
    }
}

impl Drop for Keeper {
    fn drop(&mut self) {
        // The keeper thread goes first, so that the event bus handles every event it published.
        let _ = self.keeper_shutdown.send(());
        if let Some(keeper_thread) = self.keeper_thread.take() {
            let _ = keeper_thread.join();
        }

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| {
                let _ = shutdown.send(());
            });
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}

/// Enumerates the ways executing one task, or one of its calls, can fail. None of these stop the tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task {task}: ABI {abi} is not loaded")]
    UnknownAbi { task: String, abi: String },

    #[error("task {task}: network {network} is not configured")]
    UnknownNetwork { task: String, network: String },

    #[error("task {task}: no sender address, this node is not in the topology")]
    NoSender { task: String },

    #[error("task {task} still has a transaction in flight")]
    CallPending { task: String },

    #[error("task {task}: cannot encode {method}: {source}")]
    Abi {
        task: String,
        method: String,
        source: AbiError,
    },

    #[error("task {task}: {method} failed: {source}")]
    Tx {
        task: String,
        method: String,
        source: TxError,
    },
}

/// Enumerates the ways a keeper can fail to start.
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tasks(#[from] TaskFileError),

    #[error(transparent)]
    Abi(#[from] AbiError),

    #[error(transparent)]
    EpochClock(#[from] EpochClockError),

    #[error("network {network}: {source}")]
    Chain { network: String, source: ChainError },

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Management(#[from] ManagementError),

    #[error("cannot create BI sink: {0}")]
    Bi(String),

    #[error("debug mode requires KEEPER_DEBUG_PRIVATE_KEY")]
    MissingDebugKey,
}
