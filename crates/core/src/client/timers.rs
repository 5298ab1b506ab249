//! Background timers: session keep-alive and the carrier-switch watchdog.
//!
//! Each timer is a thread holding a [`Weak`] reference to the client, so a
//! dropped client is never kept alive by its own timers. Ticks take the
//! state lock like any other operation.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::client::state::{ClientState, SessionState};
use crate::client::{ClientInner, PlayRange, Shared};
use crate::error::Result;
use crate::events::ClientEvent;
use crate::media::{MediaProtocol, TransportContext};
use crate::protocol::{RtspMessage, RtspMethod, StatusCode};

#[derive(Debug, Default)]
struct TimerFlag {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Cancellation handle of a scheduled timer.
#[derive(Debug, Clone)]
pub(crate) struct TimerHandle {
    flag: Arc<TimerFlag>,
}

impl TimerHandle {
    pub(crate) fn cancel(&self) {
        *self.flag.cancelled.lock() = true;
        self.flag.wake.notify_all();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.flag.cancelled.lock()
    }

    fn is(&self, other: &TimerHandle) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }

    /// Sleep for `delay` unless cancelled first. Returns `false` if cancelled.
    fn sleep(&self, delay: Duration) -> bool {
        let deadline = Instant::now().checked_add(delay);
        let mut cancelled = self.flag.cancelled.lock();
        while !*cancelled {
            match deadline {
                Some(deadline) => {
                    if self.flag.wake.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
                // Past the end of time; only cancellation wakes us.
                None => self.flag.wake.wait(&mut cancelled),
            }
        }
        !*cancelled
    }
}

/// Run `tick` after `delay`, then again after whatever delay it returns,
/// until it returns `None`, the handle is cancelled, or the client is gone.
pub(crate) fn schedule<F>(name: &str, delay: Duration, client: Weak<ClientInner>, mut tick: F) -> TimerHandle
where
    F: FnMut(&ClientInner, &TimerHandle) -> Option<Duration> + Send + 'static,
{
    let handle = TimerHandle {
        flag: Arc::new(TimerFlag::default()),
    };
    let timer = handle.clone();
    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
        let mut delay = delay;
        while timer.sleep(delay) {
            let Some(inner) = client.upgrade() else {
                break;
            };
            match tick(&inner, &timer) {
                Some(next) => delay = next,
                None => break,
            }
        }
    });
    if let Err(e) = spawned {
        tracing::warn!(timer = name, error = %e, "unable to spawn timer thread");
        handle.cancel();
    }
    handle
}

/// Keep-alive tick: refresh the session and check that media still flows.
pub(crate) fn keep_alive(inner: &ClientInner, timer: &TimerHandle) -> Option<Duration> {
    inner.with_state(|st, sh| {
        if timer.is_cancelled() {
            return None;
        }
        match st.keep_alive(sh) {
            Ok(()) if timer.is_cancelled() || st.timeout.is_zero() => None,
            Ok(()) => Some(st.timeout),
            Err(e) => {
                tracing::warn!(error = %e, "keep-alive failed, stopping it");
                if st.keepalive.as_ref().is_some_and(|k| k.is(timer)) {
                    st.keepalive = None;
                }
                timer.cancel();
                None
            }
        }
    })
}

/// Watchdog tick: switch carrier if PLAY produced no media at all.
pub(crate) fn protocol_switch(inner: &ClientInner, timer: &TimerHandle) -> Option<Duration> {
    inner.with_state(|st, sh| {
        if timer.is_cancelled() {
            return None;
        }
        if st.switch_timer.as_ref().is_some_and(|t| t.is(timer)) {
            st.switch_timer = None;
        }
        if let Err(e) = st.switch_protocols(sh) {
            tracing::warn!(error = %e, "carrier switch failed");
        }
        None
    })
}

impl ClientState {
    pub(crate) fn keep_alive(&mut self, sh: &Shared) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }

        if !self.timeout.is_zero() {
            let method = [RtspMethod::GetParameter, RtspMethod::Options, RtspMethod::Play]
                .into_iter()
                .find(|m| self.supported.contains(m))
                .unwrap_or(RtspMethod::Options);
            tracing::trace!(%method, "keep-alive");
            match method {
                RtspMethod::GetParameter => {
                    self.send_get_parameter(sh, None, None, false)?;
                }
                RtspMethod::Play => {
                    self.send_play(sh, None, &PlayRange::default(), false)?;
                }
                _ => {
                    self.send_options(sh, false)?;
                }
            }
        }

        if self.lifecycle == SessionState::Playing {
            self.ensure_media_flow(sh)?;

            let ended: Vec<Arc<TransportContext>> = sh
                .media
                .lock()
                .contexts()
                .iter()
                .filter(|c| c.has_ended())
                .cloned()
                .collect();
            for context in ended {
                tracing::info!(media = %context.media.media_type, "media ended");
                self.emit(ClientEvent::Stopped(Some(context.media.clone())));
            }
        }
        Ok(())
    }

    /// Restart media that stopped arriving, once the receiver has been up
    /// for longer than the session timeout.
    fn ensure_media_flow(&mut self, sh: &Shared) -> Result<()> {
        let stalled: Vec<Arc<TransportContext>> = {
            let media = sh.media.lock();
            if media.uptime() <= self.timeout {
                return Ok(());
            }
            media
                .contexts()
                .iter()
                .filter(|c| c.is_stalled() && !c.has_ended())
                .cloned()
                .collect()
        };
        if stalled.is_empty() {
            return Ok(());
        }

        let can_pause = self.supported.contains(&RtspMethod::Pause);
        let mut stop_all = false;
        for context in stalled {
            let md = &context.media;
            tracing::info!(media = %md.media_type, "no media received, restarting it");
            let response = if can_pause {
                self.send_pause(sh, Some(md), false)?
            } else {
                self.send_teardown(sh, Some(md))?
            };

            match response.as_ref().and_then(RtspMessage::status) {
                Some(StatusCode::OK) => self.play(sh, Some(md), &PlayRange::default())?,
                None if !can_pause => self.play(sh, Some(md), &PlayRange::default())?,
                Some(StatusCode::AGGREGATE_OPERATION_NOT_ALLOWED) => {
                    stop_all = true;
                    break;
                }
                _ => {}
            }
        }

        if stop_all {
            tracing::info!("per-media control refused, restarting the whole session");
            if can_pause {
                self.pause(sh, None, false)?;
            } else {
                self.stop_playing(sh);
            }
            self.start_playing(sh, None, None, None)?;
        }
        Ok(())
    }

    /// Move to the next untried carrier when PLAY brought no RTP at all.
    pub(crate) fn switch_protocols(&mut self, sh: &Shared) -> Result<()> {
        if self.lifecycle != SessionState::Playing {
            return Ok(());
        }
        let silent = {
            let media = sh.media.lock();
            let contexts = media.contexts();
            !contexts.is_empty()
                && contexts
                    .iter()
                    .all(|c| c.is_rtp_enabled() && c.stats.rtp_packets() == 0)
        };
        if !silent {
            return Ok(());
        }

        let mut tried = self.tried_protocols.clone();
        if !self.carrier.is_stream() {
            // Nothing can be interleaved on a datagram control connection.
            tried.push(MediaProtocol::Tcp);
        }
        let Some(next) = self.media_protocol.next_untried(&tried) else {
            tracing::warn!(carrier = %self.media_protocol, "no media and no untried carrier left");
            return Ok(());
        };

        tracing::info!(from = %self.media_protocol, to = %next, "no media received, switching carrier");
        self.media_protocol = next;
        self.tried_protocols.push(next);
        self.stop_playing(sh);
        self.start_playing(sh, None, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_wakes_sleeper() {
        let handle = TimerHandle {
            flag: Arc::new(TimerFlag::default()),
        };
        let other = handle.clone();
        let t = thread::spawn(move || other.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        handle.cancel();
        assert!(!t.join().unwrap());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn unbounded_sleep_is_cancellable() {
        let handle = TimerHandle {
            flag: Arc::new(TimerFlag::default()),
        };
        let other = handle.clone();
        let t = thread::spawn(move || other.sleep(Duration::MAX));
        thread::sleep(Duration::from_millis(20));
        handle.cancel();
        assert!(!t.join().unwrap());
    }

    #[test]
    fn sleep_runs_out_when_not_cancelled() {
        let handle = TimerHandle {
            flag: Arc::new(TimerFlag::default()),
        };
        let started = Instant::now();
        assert!(handle.sleep(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
