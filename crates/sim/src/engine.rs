//! Task engine: advances every unit's task tree by one tick.
//!
//! State machine per node: Idle -> Active -> {Completed, Failed}. Terminal
//! states are final. Every transition is appended to a log that the caller
//! drains once per tick; nothing is delivered through callbacks.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::map::MapRoot;
use crate::pathfinder::PathFinder;
use crate::runner::{CmdOutcome, TaskRunner};
use crate::task::{EvalContext, TaskId, TaskInfo, TaskState, TaskType};

/// One state change of one task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTransition {
    pub tick: i64,
    pub task: TaskId,
    pub unit: i32,
    pub from: TaskState,
    pub to: TaskState,
}

/// A pathfinder and the runner that uses it.
#[derive(Debug)]
pub struct Lane {
    pub pathfinder: PathFinder,
    pub runner: TaskRunner,
}

impl Lane {
    pub fn new(path_budget: usize, max_repath: u32) -> Self {
        Self {
            pathfinder: PathFinder::new(path_budget),
            runner: TaskRunner::new(max_repath),
        }
    }

    /// Run this lane's pathfinder then its runner.
    pub fn update(
        &mut self,
        map: &MapRoot,
        abilities: &BTreeMap<i32, crate::config::Abilities>,
    ) -> Vec<crate::runner::UnitIntent> {
        self.pathfinder.update(map);
        self.runner.update(map, &mut self.pathfinder, abilities)
    }
}

/// Human and bot lanes. Units are routed by their owner's player index.
#[derive(Debug)]
pub struct Lanes {
    pub human: Lane,
    pub bot: Lane,
    bot_players: BTreeSet<i32>,
}

impl Lanes {
    pub fn new(human: Lane, bot: Lane) -> Self {
        Self {
            human,
            bot,
            bot_players: BTreeSet::new(),
        }
    }

    pub fn mark_bot(&mut self, player_index: i32) {
        self.bot_players.insert(player_index);
    }

    pub fn is_bot(&self, player_index: i32) -> bool {
        self.bot_players.contains(&player_index)
    }

    pub fn for_owner(&mut self, owner: i32) -> &mut Lane {
        if self.bot_players.contains(&owner) {
            &mut self.bot
        } else {
            &mut self.human
        }
    }
}

/// What guards may read.
#[derive(Debug, Clone, Copy)]
pub struct EvalEnv<'a> {
    pub map: &'a MapRoot,
    pub sight_radius: i32,
}

#[derive(Debug)]
struct Entry {
    tree: TaskInfo,
    owner: i32,
    added: i64,
}

#[derive(Debug, Default)]
pub struct TaskEngine {
    trees: BTreeMap<i32, Entry>,
    history: BTreeMap<TaskId, TaskState>,
    retain_finished: bool,
    log: Vec<TaskTransition>,
}

impl TaskEngine {
    pub fn new(retain_finished: bool) -> Self {
        Self {
            retain_finished,
            ..Self::default()
        }
    }

    /// Install `tree` (ids already assigned) as the program of `unit`.
    /// A live tree for the same unit fails.
    pub fn add_tree(&mut self, tick: i64, unit: i32, owner: i32, tree: TaskInfo, lanes: &mut Lanes) {
        self.cancel_unit(tick, unit, lanes);
        debug!("Unit {} takes task tree {} ({} nodes)", unit, tree.id, tree.node_count());
        self.trees.insert(
            unit,
            Entry {
                tree,
                owner,
                added: tick,
            },
        );
    }

    /// Fail and detach the tree of `unit`. Returns whether there was one.
    pub fn cancel_unit(&mut self, tick: i64, unit: i32, lanes: &mut Lanes) -> bool {
        let Some(mut entry) = self.trees.remove(&unit) else {
            return false;
        };
        let mut step = Step {
            tick,
            unit,
            eval: None,
            lane: lanes.for_owner(entry.owner),
            outcomes: &mut BTreeMap::new(),
            log: &mut self.log,
        };
        step.fail(&mut entry.tree, true);
        self.detach(entry.tree);
        true
    }

    pub fn has_tree(&self, unit: i32) -> bool {
        self.trees.contains_key(&unit)
    }

    pub fn tree(&self, unit: i32) -> Option<&TaskInfo> {
        self.trees.get(&unit).map(|e| &e.tree)
    }

    /// Tick at which the live tree of `unit` was installed.
    pub fn added_at(&self, unit: i32) -> Option<i64> {
        self.trees.get(&unit).map(|e| e.added)
    }

    pub fn live_units(&self) -> impl Iterator<Item = i32> + '_ {
        self.trees.keys().copied()
    }

    /// State of any live or retained task node.
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.trees
            .values()
            .find_map(|e| e.tree.find(id).map(|t| t.state))
            .or_else(|| self.history.get(&id).copied())
    }

    /// Drain transitions logged outside `update` (cancellations).
    pub fn take_transitions(&mut self) -> Vec<TaskTransition> {
        std::mem::take(&mut self.log)
    }

    fn detach(&mut self, tree: TaskInfo) {
        debug!("Task tree {} finished as {:?}", tree.id, tree.state);
        if self.retain_finished {
            let history = &mut self.history;
            tree.walk(&mut |t| {
                history.insert(t.id, t.state);
            });
        }
    }

    /// Advance every tree by one tick, in unit order, and return the
    /// transitions logged since the previous call.
    pub fn update(&mut self, tick: i64, env: &EvalEnv<'_>, lanes: &mut Lanes) -> Vec<TaskTransition> {
        let mut outcomes: BTreeMap<TaskId, CmdOutcome> = BTreeMap::new();
        for outcome in lanes
            .human
            .runner
            .take_finished()
            .into_iter()
            .chain(lanes.bot.runner.take_finished())
        {
            outcomes.insert(outcome.task, outcome);
        }

        let units: Vec<i32> = self.trees.keys().copied().collect();
        for unit in units {
            let Some(mut entry) = self.trees.remove(&unit) else {
                continue;
            };
            let mut step = Step {
                tick,
                unit,
                eval: Some(EvalContext {
                    map: env.map,
                    unit,
                    sight_radius: env.sight_radius,
                }),
                lane: lanes.for_owner(entry.owner),
                outcomes: &mut outcomes,
                log: &mut self.log,
            };
            step.advance(&mut entry.tree);
            if entry.tree.is_terminal() {
                self.detach(entry.tree);
            } else {
                self.trees.insert(unit, entry);
            }
        }

        std::mem::take(&mut self.log)
    }
}

struct Step<'a, 'm> {
    tick: i64,
    unit: i32,
    eval: Option<EvalContext<'m>>,
    lane: &'a mut Lane,
    outcomes: &'a mut BTreeMap<TaskId, CmdOutcome>,
    log: &'a mut Vec<TaskTransition>,
}

impl Step<'_, '_> {
    fn set(&mut self, node: &mut TaskInfo, to: TaskState) {
        if node.state == to || node.state.is_terminal() {
            return;
        }
        self.log.push(TaskTransition {
            tick: self.tick,
            task: node.id,
            unit: self.unit,
            from: node.state,
            to,
        });
        node.state = to;
    }

    fn guard_holds(&self, node: &TaskInfo) -> bool {
        match (&node.expression, &self.eval) {
            (None, _) => true,
            (Some(expr), Some(ctx)) => expr.eval_guard(ctx),
            (Some(_), None) => false,
        }
    }

    /// Fail `node` and its active descendants, stopping any command they run.
    fn fail(&mut self, node: &mut TaskInfo, root: bool) {
        if node.is_terminal() || (!root && node.state != TaskState::Active) {
            return;
        }
        for child in &mut node.children {
            self.fail(child, false);
        }
        if node.task_type == TaskType::Command && self.lane.runner.current(self.unit) == Some(node.id) {
            self.lane.runner.cancel(self.unit, &mut self.lane.pathfinder);
        }
        self.outcomes.remove(&node.id);
        self.set(node, TaskState::Failed);
    }

    fn advance(&mut self, node: &mut TaskInfo) {
        if node.is_terminal() {
            return;
        }
        if node.state == TaskState::Idle {
            self.set(node, TaskState::Active);
        }
        match node.task_type {
            TaskType::Command => self.advance_command(node),
            TaskType::Sequence => self.advance_sequence(node),
            TaskType::Branch => self.advance_branch(node),
        }
    }

    fn advance_command(&mut self, node: &mut TaskInfo) {
        if !self.guard_holds(node) {
            self.fail(node, true);
            return;
        }
        if let Some(outcome) = self.outcomes.remove(&node.id) {
            self.set(node, outcome.state);
            return;
        }
        if self.lane.runner.current(self.unit) != Some(node.id) {
            match node.cmd {
                Some(cmd) => self.lane.runner.start(node.id, cmd, &mut self.lane.pathfinder),
                None => self.set(node, TaskState::Failed),
            }
        }
    }

    fn advance_sequence(&mut self, node: &mut TaskInfo) {
        if !self.guard_holds(node) {
            self.fail(node, true);
            return;
        }
        for i in 0..node.children.len() {
            match node.children[i].state {
                TaskState::Completed => continue,
                TaskState::Failed => {
                    self.fail(node, true);
                    return;
                }
                _ => {}
            }
            self.advance(&mut node.children[i]);
            match node.children[i].state {
                TaskState::Completed => continue,
                TaskState::Failed => {
                    self.fail(node, true);
                    return;
                }
                _ => return,
            }
        }
        self.set(node, TaskState::Completed);
    }

    fn advance_branch(&mut self, node: &mut TaskInfo) {
        let selected = if self.guard_holds(node) {
            Some(0)
        } else if node.children.len() > 1 {
            Some(1)
        } else {
            None
        };
        for (i, child) in node.children.iter_mut().enumerate() {
            if Some(i) != selected && child.state == TaskState::Active {
                self.fail(child, false);
            }
        }
        let Some(i) = selected else {
            self.set(node, TaskState::Completed);
            return;
        };
        let Some(child) = node.children.get_mut(i) else {
            self.set(node, TaskState::Failed);
            return;
        };
        self.advance(child);
        let state = child.state;
        if state.is_terminal() {
            self.set(node, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Abilities;
    use crate::coords::Coordinate;
    use crate::runner::ActionOutcome;
    use crate::task::{Cmd, Expression, TaskIdAlloc, UnitVar};

    fn lanes() -> Lanes {
        Lanes::new(Lane::new(64, 2), Lane::new(64, 2))
    }

    fn tree(mut t: TaskInfo, alloc: &mut TaskIdAlloc) -> TaskInfo {
        t.assign_ids(alloc);
        t
    }

    /// Drive the engine alone: every intent is reported as `outcome`.
    fn run(
        engine: &mut TaskEngine,
        lanes: &mut Lanes,
        map: &MapRoot,
        ticks: i64,
        outcome: ActionOutcome,
    ) -> Vec<TaskTransition> {
        let abilities: BTreeMap<i32, Abilities> = [(0, Abilities::defaults()), (1, Abilities::defaults())].into();
        let env = EvalEnv { map, sight_radius: 1 };
        let mut all = Vec::new();
        for tick in 1..=ticks {
            let intents = lanes.human.update(map, &abilities);
            all.extend(engine.update(tick, &env, lanes));
            for intent in intents {
                lanes.human.runner.on_resolved(intent.unit(), outcome, &mut lanes.human.pathfinder);
            }
        }
        all
    }

    #[test]
    fn test_sequence_of_waits_completes_in_order() {
        let map = MapRoot::test_env0().unwrap();
        let mut alloc = TaskIdAlloc::new();
        let mut lanes = lanes();
        let mut engine = TaskEngine::new(true);
        let t = tree(
            TaskInfo::sequence(vec![TaskInfo::command(Cmd::wait(1, 1)), TaskInfo::command(Cmd::wait(1, 0))]),
            &mut alloc,
        );
        let (root, first, second) = (t.id, t.children[0].id, t.children[1].id);
        engine.add_tree(0, 1, 1, t, &mut lanes);

        let log = run(&mut engine, &mut lanes, &map, 10, ActionOutcome::Done);
        let seq: Vec<(TaskId, TaskState)> = log.iter().map(|t| (t.task, t.to)).collect();
        assert_eq!(
            seq,
            vec![
                (root, TaskState::Active),
                (first, TaskState::Active),
                (first, TaskState::Completed),
                (second, TaskState::Active),
                (second, TaskState::Completed),
                (root, TaskState::Completed),
            ]
        );
        assert!(!engine.has_tree(1));
        assert_eq!(engine.task_state(root), Some(TaskState::Completed));
    }

    #[test]
    fn test_terminal_states_never_transition_again() {
        let map = MapRoot::test_env0().unwrap();
        let mut alloc = TaskIdAlloc::new();
        let mut lanes = lanes();
        let mut engine = TaskEngine::new(false);
        let t = tree(
            TaskInfo::branch(
                Expression::bool(true),
                TaskInfo::command(Cmd::move_to(1, Coordinate::new(1, 3, 6, 2))),
                None,
            ),
            &mut alloc,
        );
        engine.add_tree(0, 1, 1, t, &mut lanes);
        let log = run(&mut engine, &mut lanes, &map, 40, ActionOutcome::Blocked);

        let mut seen: BTreeMap<TaskId, Vec<TaskState>> = BTreeMap::new();
        for t in &log {
            seen.entry(t.task).or_default().push(t.to);
        }
        for states in seen.values() {
            let activations = states.iter().filter(|s| **s == TaskState::Active).count();
            assert!(activations <= 1);
            let terminal_at = states.iter().position(|s| s.is_terminal());
            if let Some(i) = terminal_at {
                assert_eq!(i, states.len() - 1);
            }
        }
        // blocked forever: the move fails after its repaths and the branch adopts it
        assert!(log.iter().any(|t| t.to == TaskState::Failed));
        assert!(!engine.has_tree(1));
    }

    #[test]
    fn test_false_branch_guard_runs_else_child() {
        let map = MapRoot::test_env0().unwrap();
        let mut alloc = TaskIdAlloc::new();
        let mut lanes = lanes();
        let mut engine = TaskEngine::new(true);
        let t = tree(
            TaskInfo::branch(
                Expression::bool(false),
                TaskInfo::command(Cmd::wait(1, 5)),
                Some(TaskInfo::command(Cmd::wait(1, 0))),
            ),
            &mut alloc,
        );
        let (root, then_id, else_id) = (t.id, t.children[0].id, t.children[1].id);
        engine.add_tree(0, 1, 1, t, &mut lanes);
        run(&mut engine, &mut lanes, &map, 5, ActionOutcome::Done);
        assert_eq!(engine.task_state(else_id), Some(TaskState::Completed));
        assert_eq!(engine.task_state(then_id), Some(TaskState::Idle));
        assert_eq!(engine.task_state(root), Some(TaskState::Completed));
    }

    #[test]
    fn test_branch_switch_fails_abandoned_child() {
        let mut map = MapRoot::test_env0().unwrap();
        let mut alloc = TaskIdAlloc::new();
        let mut lanes = lanes();
        let mut engine = TaskEngine::new(true);
        let t = tree(
            TaskInfo::branch(
                Expression::lt(Expression::var(UnitVar::Height), Expression::int(2)),
                TaskInfo::command(Cmd::wait(1, 100)),
                Some(TaskInfo::command(Cmd::wait(1, 0))),
            ),
            &mut alloc,
        );
        let (root, then_id, else_id) = (t.id, t.children[0].id, t.children[1].id);
        engine.add_tree(0, 1, 1, t, &mut lanes);
        run(&mut engine, &mut lanes, &map, 3, ActionOutcome::Done);
        assert_eq!(engine.task_state(then_id), Some(TaskState::Active));

        let id = map.unit(1).unwrap();
        map.set_height(id, 3).unwrap();
        run(&mut engine, &mut lanes, &map, 3, ActionOutcome::Done);
        assert_eq!(engine.task_state(then_id), Some(TaskState::Failed));
        assert_eq!(engine.task_state(else_id), Some(TaskState::Completed));
        assert_eq!(engine.task_state(root), Some(TaskState::Completed));
    }

    #[test]
    fn test_replacing_tree_fails_old_one() {
        let map = MapRoot::test_env0().unwrap();
        let mut alloc = TaskIdAlloc::new();
        let mut lanes = lanes();
        let mut engine = TaskEngine::new(true);
        let old = tree(TaskInfo::command(Cmd::wait(1, 100)), &mut alloc);
        let old_id = old.id;
        engine.add_tree(0, 1, 1, old, &mut lanes);
        run(&mut engine, &mut lanes, &map, 2, ActionOutcome::Done);
        assert_eq!(lanes.human.runner.current(1), Some(old_id));

        let new = tree(TaskInfo::command(Cmd::wait(1, 0)), &mut alloc);
        engine.add_tree(3, 1, 1, new, &mut lanes);
        let log = engine.take_transitions();
        assert_eq!(log.len(), 1);
        assert_eq!((log[0].task, log[0].from, log[0].to), (old_id, TaskState::Active, TaskState::Failed));
        assert_eq!(lanes.human.runner.current(1), None);
        assert_eq!(engine.task_state(old_id), Some(TaskState::Failed));
    }

    #[test]
    fn test_false_guard_fails_command() {
        let map = MapRoot::test_env0().unwrap();
        let mut alloc = TaskIdAlloc::new();
        let mut lanes = lanes();
        let mut engine = TaskEngine::new(true);
        let t = tree(
            TaskInfo::command(Cmd::wait(1, 3)).with_guard(Expression::unit_exists(77)),
            &mut alloc,
        );
        let id = t.id;
        engine.add_tree(0, 1, 1, t, &mut lanes);
        let log = run(&mut engine, &mut lanes, &map, 1, ActionOutcome::Done);
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].to, TaskState::Failed);
        assert_eq!(engine.task_state(id), Some(TaskState::Failed));
    }
}
