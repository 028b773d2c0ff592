//! Executes one command per unit and turns it into per-tick intents.
//!
//! Runners never touch the map. They read it, ask the pathfinder for routes
//! and emit [`UnitIntent`]s; the match engine applies the intents and reports
//! back through [`TaskRunner::on_resolved`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::config::Abilities;
use crate::coords::{Dir, MapPos};
use crate::error::SimError;
use crate::map::{MapRoot, VoxelType};
use crate::pathfinder::{PathFinder, PathResult};
use crate::task::{Cmd, CmdCode, TaskId, TaskState};

/// A single map mutation requested by a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitIntent {
    Step { unit: i32, to: MapPos },
    Grow { unit: i32 },
    Diminish { unit: i32 },
    Split { unit: i32, dir: Dir },
    Convert { unit: i32, into: VoxelType },
    Explode { unit: i32 },
}

impl UnitIntent {
    pub fn unit(&self) -> i32 {
        match *self {
            UnitIntent::Step { unit, .. }
            | UnitIntent::Grow { unit }
            | UnitIntent::Diminish { unit }
            | UnitIntent::Split { unit, .. }
            | UnitIntent::Convert { unit, .. }
            | UnitIntent::Explode { unit } => unit,
        }
    }
}

/// How the match engine handled an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    /// Transient obstruction; the unit may retry.
    Blocked,
    /// The action can never succeed in the current state.
    Rejected,
}

/// A command that stopped running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutcome {
    pub unit: i32,
    pub task: TaskId,
    pub state: TaskState,
    pub reason: Option<SimError>,
}

#[derive(Debug)]
struct Running {
    task: TaskId,
    cmd: Cmd,
    path: VecDeque<MapPos>,
    searching: bool,
    repaths: u32,
    wait_left: i64,
    /// Intent emitted this tick, waiting for resolution.
    in_flight: bool,
}

/// Runs the current command of each unit it owns.
#[derive(Debug)]
pub struct TaskRunner {
    max_repath: u32,
    running: BTreeMap<i32, Running>,
    finished: Vec<CmdOutcome>,
}

impl TaskRunner {
    pub fn new(max_repath: u32) -> Self {
        Self {
            max_repath,
            running: BTreeMap::new(),
            finished: Vec::new(),
        }
    }

    /// Start `cmd` for its unit, replacing anything it was running.
    pub fn start(&mut self, task: TaskId, cmd: Cmd, pathfinder: &mut PathFinder) {
        pathfinder.cancel(cmd.unit);
        self.running.insert(
            cmd.unit,
            Running {
                task,
                cmd,
                path: VecDeque::new(),
                searching: false,
                repaths: 0,
                wait_left: cmd.param as i64,
                in_flight: false,
            },
        );
    }

    /// Stop a unit silently; the caller owns the task bookkeeping.
    pub fn cancel(&mut self, unit: i32, pathfinder: &mut PathFinder) -> Option<TaskId> {
        pathfinder.cancel(unit);
        self.finished.retain(|o| o.unit != unit);
        self.running.remove(&unit).map(|r| r.task)
    }

    /// Task currently driven for `unit`.
    pub fn current(&self, unit: i32) -> Option<TaskId> {
        self.running.get(&unit).map(|r| r.task)
    }

    /// Whether `unit` emitted an intent this tick that awaits resolution.
    pub fn in_flight(&self, unit: i32) -> bool {
        self.running.get(&unit).is_some_and(|r| r.in_flight)
    }

    pub fn units(&self) -> BTreeSet<i32> {
        self.running.keys().copied().collect()
    }

    pub fn take_finished(&mut self) -> Vec<CmdOutcome> {
        std::mem::take(&mut self.finished)
    }

    fn finish(&mut self, unit: i32, state: TaskState, reason: Option<SimError>) {
        if let Some(r) = self.running.remove(&unit) {
            if let Some(e) = &reason {
                debug!("Unit {} task {} failed: {}", unit, r.task, e);
            }
            self.finished.push(CmdOutcome {
                unit,
                task: r.task,
                state,
                reason,
            });
        }
    }

    /// Advance every running command by one tick.
    ///
    /// `abilities` is keyed by player index.
    pub fn update(
        &mut self,
        map: &MapRoot,
        pathfinder: &mut PathFinder,
        abilities: &BTreeMap<i32, Abilities>,
    ) -> Vec<UnitIntent> {
        let mut intents = Vec::new();
        let units: Vec<i32> = self.running.keys().copied().collect();
        for unit in units {
            match self.advance(unit, map, pathfinder, abilities) {
                Ok(Some(intent)) => intents.push(intent),
                Ok(None) => {}
                Err((state, reason)) => {
                    pathfinder.cancel(unit);
                    self.finish(unit, state, reason);
                }
            }
        }
        intents
    }

    /// `Err` finishes the command with the given state.
    fn advance(
        &mut self,
        unit: i32,
        map: &MapRoot,
        pathfinder: &mut PathFinder,
        abilities: &BTreeMap<i32, Abilities>,
    ) -> Result<Option<UnitIntent>, (TaskState, Option<SimError>)> {
        let Some(run) = self.running.get_mut(&unit) else {
            return Ok(None);
        };
        let Some(data) = map.unit_data(unit).filter(|v| v.voxel_type.is_unit()) else {
            return Err((TaskState::Failed, Some(SimError::InvalidTarget(format!("unit {unit} is gone")))));
        };
        let Some(here) = map.unit_coordinate(unit) else {
            return Err((TaskState::Failed, Some(SimError::InvalidTarget(format!("unit {unit} is gone")))));
        };
        let ability = abilities.get(&data.owner).copied().unwrap_or_default().of(data.voxel_type);
        let ready = data.unit.is_none_or(|u| u.is_ready());
        run.in_flight = false;

        match run.cmd.code {
            CmdCode::Cancel => Err((TaskState::Completed, None)),
            CmdCode::Wait => {
                if run.wait_left <= 0 {
                    return Err((TaskState::Completed, None));
                }
                run.wait_left -= 1;
                Ok(None)
            }
            CmdCode::Move => {
                let Some(target) = run.cmd.target else {
                    return Err((TaskState::Failed, Some(SimError::InvalidTarget("move without target".into()))));
                };
                if target.weight != here.weight {
                    return Err((
                        TaskState::Failed,
                        Some(SimError::InvalidTarget(format!("target weight {} != unit weight", target.weight))),
                    ));
                }
                if here.pos == target.pos {
                    return Err((TaskState::Completed, None));
                }
                if !ability.can_move() {
                    return Err((TaskState::Failed, Some(SimError::InvalidTarget(format!("unit {unit} cannot move")))));
                }
                if run.searching {
                    match pathfinder.take_result(unit) {
                        Some(PathResult::Found(path)) => {
                            run.searching = false;
                            run.path = path.into();
                        }
                        Some(PathResult::Failed(e)) => return Err((TaskState::Failed, Some(e))),
                        None => {
                            if !pathfinder.is_searching(unit) {
                                run.searching = false;
                            }
                            return Ok(None);
                        }
                    }
                }
                // the path must continue from where the unit stands
                let stale = run
                    .path
                    .front()
                    .is_some_and(|next| Dir::between(here.pos, *next).is_none());
                if run.path.is_empty() || stale {
                    run.path.clear();
                    run.searching = true;
                    pathfinder.request(map, unit, here, target.pos, ability.max_step);
                    return Ok(None);
                }
                if !ready {
                    return Ok(None);
                }
                let Some(&to) = run.path.front() else {
                    return Ok(None);
                };
                run.in_flight = true;
                Ok(Some(UnitIntent::Step { unit, to }))
            }
            code => {
                if !ready {
                    return Ok(None);
                }
                let intent = match code {
                    CmdCode::Grow => UnitIntent::Grow { unit },
                    CmdCode::Diminish => UnitIntent::Diminish { unit },
                    CmdCode::Explode => UnitIntent::Explode { unit },
                    CmdCode::Split => {
                        let param = run.cmd.param;
                        let dir = Dir::from_index(param).ok_or_else(|| {
                            (
                                TaskState::Failed,
                                Some(SimError::InvalidTarget(format!("split direction {param}"))),
                            )
                        })?;
                        UnitIntent::Split { unit, dir }
                    }
                    CmdCode::Convert => {
                        let param = run.cmd.param;
                        let into = u8::try_from(param).ok().and_then(VoxelType::from_u8).ok_or_else(|| {
                            (
                                TaskState::Failed,
                                Some(SimError::InvalidTarget(format!("convert into {param}"))),
                            )
                        })?;
                        UnitIntent::Convert { unit, into }
                    }
                    _ => return Ok(None),
                };
                run.in_flight = true;
                Ok(Some(intent))
            }
        }
    }

    /// Feed back the result of an intent emitted by this runner.
    pub fn on_resolved(&mut self, unit: i32, outcome: ActionOutcome, pathfinder: &mut PathFinder) {
        let max_repath = self.max_repath;
        let Some(run) = self.running.get_mut(&unit) else {
            return;
        };
        if !run.in_flight {
            return;
        }
        run.in_flight = false;

        match (run.cmd.code, outcome) {
            (CmdCode::Move, ActionOutcome::Done) => {
                run.path.pop_front();
                run.repaths = 0;
            }
            (CmdCode::Move, ActionOutcome::Blocked) => {
                run.path.clear();
                run.repaths += 1;
                if run.repaths > max_repath {
                    pathfinder.cancel(unit);
                    self.finish(unit, TaskState::Failed, Some(SimError::Unreachable(unit)));
                }
            }
            (CmdCode::Move, ActionOutcome::Rejected) => {
                self.finish(unit, TaskState::Failed, Some(SimError::Unreachable(unit)));
            }
            (_, ActionOutcome::Done) => self.finish(unit, TaskState::Completed, None),
            (_, ActionOutcome::Blocked) => {}
            (_, ActionOutcome::Rejected) => {
                let reason = SimError::InvalidTarget(format!("{:?} rejected", run.cmd.code));
                self.finish(unit, TaskState::Failed, Some(reason));
            }
        }
    }
}
