use alloc::collections::BTreeMap;
use alloc::collections::VecDeque;

use crate::consts::NPROC;
use crate::error::Errno;
use crate::process::{Pid, Process, Status, WaitReason};
use crate::trap::TrapFrame;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A zombie child was freed; `pid` is what wait returns.
    Reaped { pid: Pid, code: isize },
    /// The caller is now blocked; carries the process picked to run instead.
    Blocked(Option<Pid>),
}

/// Process table plus FIFO ready queue. The running process is tracked here,
/// but every lifecycle operation takes the acting pid explicitly.
pub struct Sched {
    processes: BTreeMap<Pid, Process>,
    ready: VecDeque<Pid>,
    running: Option<Pid>,
    next_pid: usize,
}

impl Default for Sched {
    fn default() -> Self {
        Self::new()
    }
}

impl Sched {
    pub fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
            ready: VecDeque::with_capacity(NPROC),
            running: None,
            next_pid: 1,
        }
    }

    fn alloc_pid(&mut self) -> Result<Pid, Errno> {
        if self.processes.len() >= NPROC {
            return Err(Errno::NoProcess);
        }
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        Ok(pid)
    }

    /// Adds a freshly built process to the table and the tail of the queue.
    pub fn spawn(&mut self, mut proc: Process) -> Result<Pid, Errno> {
        let pid = self.alloc_pid()?;
        proc.status = Status::Ready;
        self.processes.insert(pid, proc);
        self.ready.push_back(pid);
        log::info!("[Sched] spawned process {}", pid);
        Ok(pid)
    }

    /// `Status::Free` for any pid without a live record.
    pub fn status(&self, pid: Pid) -> Status {
        self.processes
            .get(&pid)
            .map(|proc| proc.status)
            .unwrap_or(Status::Free)
    }

    pub fn running(&self) -> Option<Pid> {
        self.running
    }

    pub fn current(&self) -> Option<&Process> {
        self.running.and_then(|pid| self.processes.get(&pid))
    }

    pub fn current_mut(&mut self) -> Option<&mut Process> {
        let pid = self.running?;
        self.processes.get_mut(&pid)
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    pub fn ready_queue(&self) -> impl Iterator<Item = Pid> + '_ {
        self.ready.iter().copied()
    }

    /// Processes that have not exited yet.
    pub fn live_count(&self) -> usize {
        self.processes.values().filter(|proc| !proc.is_zombie()).count()
    }

    fn children(&self, parent: Pid) -> impl Iterator<Item = (Pid, &Process)> + '_ {
        self.processes
            .iter()
            .filter(move |(_, proc)| proc.parent == Some(parent))
            .map(|(pid, proc)| (*pid, proc))
    }

    /// Copies `parent` into a new Ready process. `tf` is the parent's live
    /// context, already pointing past the `ecall`.
    pub fn fork(&mut self, parent: Pid, tf: &TrapFrame) -> Result<Pid, Errno> {
        if self.processes.len() >= NPROC {
            return Err(Errno::NoProcess);
        }
        let source = self.processes.get(&parent).ok_or(Errno::InvalidArgument)?;
        let mut child = source.fork_from(tf)?;
        child.parent = Some(parent);
        let pid = self.alloc_pid()?;
        self.processes.insert(pid, child);
        self.ready.push_back(pid);
        log::info!("[Sched] process {} forked {}", parent, pid);
        Ok(pid)
    }

    /// Running -> Zombie, wakes at most one waiter, then picks the next
    /// process. The slot stays taken until a wait reaps it; a process whose
    /// parent never waits stays a zombie.
    pub fn exit(&mut self, pid: Pid, code: isize) -> Option<Pid> {
        debug_assert_eq!(self.running, Some(pid));
        if self.running == Some(pid) {
            self.running = None;
        }

        let parent = match self.processes.get_mut(&pid) {
            Some(proc) => {
                proc.status = Status::Zombie(code);
                proc.parent
            }
            None => return self.schedule(),
        };
        log::info!("[Sched] process {} exited with code {}", pid, code);

        if let Some(parent) = parent {
            self.wake_waiter(pid, parent);
        }
        self.schedule()
    }

    fn wake_waiter(&mut self, exited: Pid, parent: Pid) {
        let specific = self
            .processes
            .iter()
            .find(|(_, proc)| proc.status == Status::Blocked(WaitReason::Specific(exited)))
            .map(|(pid, _)| *pid);
        let waiter = specific.or_else(|| {
            self.processes
                .get(&parent)
                .filter(|proc| proc.status == Status::Blocked(WaitReason::AnyChild))
                .map(|_| parent)
        });

        if let Some(waiter) = waiter {
            if let Some(proc) = self.processes.get_mut(&waiter) {
                proc.status = Status::Ready;
                self.ready.push_back(waiter);
                log::debug!("[Sched] process {} woken by exit of {}", waiter, exited);
            }
        }
    }

    /// `target == -1` waits for any child, `target > 0` for that child.
    pub fn wait(&mut self, caller: Pid, target: isize) -> Result<WaitOutcome, Errno> {
        let reason = match target {
            -1 => {
                let zombie = self
                    .children(caller)
                    .find(|(_, proc)| proc.is_zombie())
                    .map(|(pid, _)| pid);
                if let Some(child) = zombie {
                    return Ok(self.reap(child));
                }
                if self.children(caller).next().is_none() {
                    return Err(Errno::InvalidArgument);
                }
                WaitReason::AnyChild
            }
            t if t > 0 => {
                let child = Pid(t as usize);
                let proc = self.processes.get(&child).ok_or(Errno::InvalidArgument)?;
                if proc.parent != Some(caller) {
                    return Err(Errno::InvalidArgument);
                }
                if proc.is_zombie() {
                    return Ok(self.reap(child));
                }
                WaitReason::Specific(child)
            }
            _ => return Err(Errno::InvalidArgument),
        };

        let proc = self.processes.get_mut(&caller).ok_or(Errno::InvalidArgument)?;
        proc.status = Status::Blocked(reason);
        if self.running == Some(caller) {
            self.running = None;
        }
        log::debug!("[Sched] process {} blocked on {:?}", caller, reason);
        Ok(WaitOutcome::Blocked(self.schedule()))
    }

    fn reap(&mut self, child: Pid) -> WaitOutcome {
        let code = match self.processes.remove(&child).map(|proc| proc.status) {
            Some(Status::Zombie(code)) => code,
            _ => 0,
        };
        log::debug!("[Sched] reaped process {}", child);
        WaitOutcome::Reaped { pid: child, code }
    }

    /// Running -> Ready at the tail of the queue, then picks the next process.
    pub fn yield_now(&mut self, pid: Pid) -> Option<Pid> {
        if let Some(proc) = self.processes.get_mut(&pid) {
            proc.status = Status::Ready;
            self.ready.push_back(pid);
        }
        if self.running == Some(pid) {
            self.running = None;
        }
        self.schedule()
    }

    /// Pops the head of the ready queue and marks it Running. `None` when
    /// nothing is ready.
    pub fn schedule(&mut self) -> Option<Pid> {
        while let Some(pid) = self.ready.pop_front() {
            let Some(proc) = self.processes.get_mut(&pid) else {
                continue;
            };
            if proc.status != Status::Ready {
                continue;
            }
            proc.status = Status::Running;
            self.running = Some(pid);
            log::debug!("[Sched] switching to {}", pid);
            return Some(pid);
        }
        None
    }

    /// Stores the live context into the running process.
    pub fn save_context(&mut self, tf: &TrapFrame) {
        if let Some(proc) = self.current_mut() {
            proc.tf = tf.clone();
        }
    }

    /// Makes `pid`'s address space current and loads its context into `tf`.
    pub fn resume(&self, pid: Pid, tf: &mut TrapFrame) {
        if let Some(proc) = self.processes.get(&pid) {
            proc.mset.activate();
            *tf = proc.tf.clone();
        }
    }
}
