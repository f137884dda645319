//! Watch loop.
//!
//! Linux kernel interfaces through nix: signalfd (clean shutdown via
//! SIGTERM/SIGINT), inotify (config.ini rewrites), poll with a one second
//! timeout as the tick. Upstream fetches run on a worker thread and report
//! back over a channel so a slow API never stalls the tick.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::io::{IsTerminal, Write};
use std::os::fd::AsFd;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use crate::config::{self, CachedSolat, Paths, Settings};
use crate::fetch::HttpUpstream;
use crate::now_epoch;
use crate::period::{self, PrayerPeriod, Snapshot};
use crate::report;
use crate::session::{effective_fix, FetchGate, LiveFix, LocationFix};
use crate::solat::{SolatError, SolatResponse, SolatService};

const TICK_MS: u16 = 1000;

type Service = SolatService<HttpUpstream>;

/// Result of one background fetch.
struct FetchOutcome {
    fix: LocationFix,
    result: Result<SolatResponse, SolatError>,
}

/// Full watch-loop state
struct WatchState {
    paths: Paths,
    settings: Settings,
    service: Arc<Service>,

    live: LiveFix,
    cached_fix: Option<LocationFix>,
    gate: FetchGate,
    in_flight: bool,
    /// Last coordinate the zone resolver refused; never retried.
    rejected: Option<LocationFix>,

    current: Option<CachedSolat>,
    last_period: Option<PrayerPeriod>,
    tty: bool,
}

/// Block SIGTERM/SIGINT and create a signalfd for clean shutdown.
fn setup_signalfd() -> Result<SignalFd> {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGTERM);
    mask.add(Signal::SIGINT);
    mask.thread_block().context("blocking SIGTERM/SIGINT")?;

    SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
        .context("creating signalfd")
}

/// Set up inotify watching the config directory for file writes.
fn setup_inotify(paths: &Paths) -> Result<Inotify> {
    let ino = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
        .context("creating inotify instance")?;
    ino.add_watch(paths.config_dir.as_path(), AddWatchFlags::IN_CLOSE_WRITE)
        .with_context(|| format!("watching {}", paths.config_dir.display()))?;
    Ok(ino)
}

/// Drain queued inotify events. True when config.ini was rewritten.
fn config_changed(ino: &Inotify, paths: &Paths) -> bool {
    let config_name = paths.config_file.file_name();
    let mut changed = false;
    loop {
        match ino.read_events() {
            Ok(events) if !events.is_empty() => {
                changed |= events
                    .iter()
                    .any(|ev| ev.name.as_deref() == config_name);
            }
            Ok(_) | Err(Errno::EAGAIN) => break,
            Err(e) => {
                log::warn!("inotify read failed: {e}");
                break;
            }
        }
    }
    changed
}

impl WatchState {
    fn spawn_fetch(&mut self, fix: LocationFix, tx: &Sender<FetchOutcome>) {
        self.in_flight = true;
        let service = Arc::clone(&self.service);
        let tx = tx.clone();
        log::info!("fetching prayer times for {:.4}, {:.4}", fix.lat, fix.lng);
        std::thread::spawn(move || {
            let result = service.get_solat(fix.lat, fix.lng).map(|(resp, _)| resp);
            let _ = tx.send(FetchOutcome { fix, result });
        });
    }

    fn finish_fetch(&mut self, outcome: FetchOutcome) {
        self.in_flight = false;
        let response = match outcome.result {
            Ok(r) => r,
            Err(e @ SolatError::OutsideCoverage { .. }) => {
                log::error!("{e}");
                self.rejected = Some(outcome.fix);
                return;
            }
            Err(e) => {
                log::warn!("fetch failed, keeping previous schedule: {e}");
                return;
            }
        };

        let schedule = match response.schedule() {
            Ok(s) => s.with_utc_offset(self.settings.utc_offset_secs()),
            Err(e) => {
                log::warn!("fetched schedule rejected: {e}");
                return;
            }
        };
        if let Err(e) = config::save_cache(&self.paths, &outcome.fix, &response) {
            log::warn!("failed to write cache: {e}");
        }
        log::info!(
            "zone {} ({}), {} days, Qiblat {:.2}°",
            response.zone.code,
            response.zone.district,
            schedule.len(),
            response.bearing
        );

        self.current = Some(CachedSolat {
            fix: outcome.fix,
            response,
            schedule,
        });
        self.last_period = None;
    }

    fn reload_config(&mut self) {
        match config::load(&self.paths) {
            Ok(cfg) => {
                match cfg.location {
                    Some(fix) => {
                        log::info!("location updated: {:.4}, {:.4}", fix.lat, fix.lng);
                        self.live = LiveFix::Ready(fix);
                    }
                    None => {
                        log::warn!("config has no usable [location], keeping previous fix");
                        self.live = LiveFix::Failed("no location in config".to_string());
                    }
                }
                self.settings.align_tolerance = cfg.settings.align_tolerance;
                self.settings.mosque_limit = cfg.settings.mosque_limit;
            }
            Err(e) => {
                log::warn!("config reload failed: {e}");
                self.live = LiveFix::Failed(e.to_string());
            }
        }
        if let LiveFix::Ready(fix) = self.live {
            self.cached_fix = Some(fix);
        }
    }

    /// Start a fetch whenever the gate allows one: the fix moved past the
    /// displacement threshold or the last fetch is older than the cache window.
    fn maybe_fetch(&mut self, now: i64, tx: &Sender<FetchOutcome>) {
        if self.in_flight {
            return;
        }
        let Some(fix) = effective_fix(&self.live, self.cached_fix) else {
            return;
        };
        if self.rejected.is_some_and(|r| !fix.moved_from(&r)) {
            return;
        }

        if self.gate.offer(fix, now) {
            self.rejected = None;
            self.spawn_fetch(LocationFix { fetched_at: now, ..fix }, tx);
        }
    }

    fn render(&mut self, now: i64) {
        let Some(current) = &self.current else {
            return;
        };
        let snap = period::snapshot(now, &current.schedule);
        let period = snap.as_ref().map_or(PrayerPeriod::Unknown, |s| s.period);

        if self.last_period != Some(period) {
            if self.tty {
                println!();
            }
            match &snap {
                Some(Snapshot { next: Some(next), .. }) => log::info!(
                    "[{}] period {} (next {} at {})",
                    current.response.zone.code,
                    period,
                    next.prayer,
                    report::clock_time(next.at, current.schedule.utc_offset_secs())
                ),
                _ => log::info!("[{}] period {}", current.response.zone.code, period),
            }
            self.last_period = Some(period);
        }

        if self.tty {
            let line = match snap.as_ref().and_then(|s| s.next.zip(s.countdown)) {
                Some((next, countdown)) => {
                    format!("{} | {} in {} ({:?})", period, next.prayer, countdown, countdown.urgency())
                }
                None if !current.schedule.covers(now) => format!("{period} | month ended, waiting for refetch"),
                None => format!("{period} | waiting for schedule"),
            };
            let mut out = std::io::stdout().lock();
            let _ = write!(out, "\r\x1b[2K{line}");
            let _ = out.flush();
        }
    }

    fn tick(&mut self, now: i64, reload: bool, tx: &Sender<FetchOutcome>, rx: &Receiver<FetchOutcome>) {
        while let Ok(outcome) = rx.try_recv() {
            self.finish_fetch(outcome);
        }
        if reload {
            self.reload_config();
        }
        self.maybe_fetch(now, tx);
        self.render(now);
    }
}

pub fn run(paths: &Paths, service: Service, settings: Settings) -> Result<()> {
    // Block signals before anything else so SIGTERM is never lost.
    let mut sfd = setup_signalfd()?;
    let ino = match setup_inotify(paths) {
        Ok(i) => Some(i),
        Err(e) => {
            log::warn!("{e:#}; config changes need a restart");
            None
        }
    };

    let cached = config::load_cache(paths, settings.utc_offset_secs());
    let cached_fix = config::load_location(paths);

    let mut state = WatchState {
        paths: paths.clone(),
        settings,
        service: Arc::new(service),
        live: LiveFix::Loading,
        cached_fix,
        gate: FetchGate::new(),
        in_flight: false,
        rejected: None,
        current: cached,
        last_period: None,
        tty: std::io::stdout().is_terminal(),
    };
    if let Some(c) = &state.current {
        log::info!("using cached schedule for {} ({})", c.response.zone.code, c.response.month);
        state.gate.record(c.fix, c.fix.fetched_at);
    }
    if state.cached_fix.is_none() {
        log::warn!("no location configured yet, waiting for --set-location");
    }

    if let Err(e) = config::write_pid(paths) {
        log::warn!("failed to write PID file: {e}");
    }

    let (tx, rx) = mpsc::channel();
    state.tick(now_epoch(), false, &tx, &rx);

    loop {
        let (signalled, reload) = {
            let mut fds = vec![PollFd::new(sfd.as_fd(), PollFlags::POLLIN)];
            if let Some(ino) = &ino {
                fds.push(PollFd::new(ino.as_fd(), PollFlags::POLLIN));
            }
            match poll(&mut fds, PollTimeout::from(TICK_MS)) {
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => {
                    config::remove_pid(paths);
                    return Err(e).context("poll");
                }
            }
            let ready = |fd: &PollFd| fd.revents().is_some_and(|r| r.contains(PollFlags::POLLIN));
            (ready(&fds[0]), fds.get(1).is_some_and(ready))
        };

        if signalled {
            if let Ok(Some(info)) = sfd.read_signal() {
                log::info!("received signal {}, shutting down", info.ssi_signo);
            }
            break;
        }

        let reload = reload && ino.as_ref().is_some_and(|i| config_changed(i, paths));
        state.tick(now_epoch(), reload, &tx, &rx);
    }

    if state.tty {
        println!();
    }
    config::remove_pid(paths);
    Ok(())
}
