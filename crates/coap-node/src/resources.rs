//! Resources served by the node.
//!
//! Configured `[[resources]]` entries become in-memory text resources. The
//! built-in set adds `uptime` (observable, NON notifications) and `upload`
//! (Block1 reassembly for large PUT/POST bodies).
//!
//! Handlers run inside the engine lock and cannot notify observers directly;
//! a write marks the resource changed and the node notifies on its next pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use coap_core::constants::{MessageType, content_format};
use coap_core::message::{Code, Message};
use coap_core::option::number::CONTENT_FORMAT;
use coap_engine::{
    AllowedMethods, Block1Assembler, Block1Outcome, Clock, CoapEngine, HandlerResult, Notifier, Observer,
    RequestContext, ResourceId, Transport,
};

use crate::config::{ResourceEntry, parse_methods};
use crate::error::NodeError;

pub const UPTIME_PATH: &str = "uptime";
pub const UPLOAD_PATH: &str = "upload";
/// Largest reassembled upload body.
pub const UPLOAD_MAX_BODY: usize = 64 * 1024;
/// Partial uploads idle this long are discarded.
const UPLOAD_IDLE_SECS: u64 = 60;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_content_format(response: &mut Message, cf: Option<u16>) {
    if let Some(cf) = cf {
        response.options.set_uint(CONTENT_FORMAT, u32::from(cf));
    }
}

/// State shared between a text resource's handler and notifier.
#[derive(Debug, Clone)]
struct TextBody {
    body: Arc<Mutex<Vec<u8>>>,
    changed: Arc<AtomicBool>,
    content_format: Option<u16>,
}

impl TextBody {
    fn handle(&self, ctx: &RequestContext, request: &Message, response: &mut Message) -> HandlerResult {
        let mut body = lock(&self.body);
        match request.code {
            Code::GET => {
                set_content_format(response, self.content_format);
                ctx.set_payload(request, response, &body);
            }
            Code::PUT | Code::POST => {
                *body = request.payload.clone();
                response.code = Code::CHANGED;
                self.changed.store(true, Ordering::SeqCst);
            }
            Code::DELETE => {
                body.clear();
                response.code = Code::DELETED;
                self.changed.store(true, Ordering::SeqCst);
            }
            _ => return HandlerResult::Error,
        }
        HandlerResult::Ok
    }

    fn notify(&self, response: &mut Message) -> HandlerResult {
        set_content_format(response, self.content_format);
        response.payload = lock(&self.body).clone();
        HandlerResult::Ok
    }
}

/// Resource registered by the node, with its change flag if it has one.
#[derive(Debug)]
struct Installed {
    id: ResourceId,
    path: String,
    changed: Option<Arc<AtomicBool>>,
}

/// The node's registered resources.
#[derive(Debug, Default)]
pub struct ResourceSet {
    installed: Vec<Installed>,
    uptime: Option<ResourceId>,
}

impl ResourceSet {
    /// Register configured resources, and the built-ins if `builtin` is set.
    pub fn install<T: Transport, C: Clock>(
        engine: &mut CoapEngine<T, C>,
        entries: &[ResourceEntry],
        builtin: bool,
        started: Instant,
    ) -> Result<Self, NodeError> {
        let mut set = ResourceSet::default();
        for entry in entries {
            set.install_text(engine, entry)?;
        }
        if builtin {
            set.install_uptime(engine, started)?;
            set.install_upload(engine, started)?;
        }
        tracing::info!(count = set.installed.len(), "resources registered");
        Ok(set)
    }

    fn install_text<T: Transport, C: Clock>(
        &mut self,
        engine: &mut CoapEngine<T, C>,
        entry: &ResourceEntry,
    ) -> Result<(), NodeError> {
        let allowed = parse_methods(&entry.methods)?;
        let text = TextBody {
            body: Arc::new(Mutex::new(entry.payload.clone().into_bytes())),
            changed: Arc::new(AtomicBool::new(false)),
            content_format: entry.content_format,
        };
        let notifier = entry.observable.then(|| {
            let shared = text.clone();
            Box::new(move |_: &Observer, msg: &mut Message| shared.notify(msg)) as Box<dyn Notifier>
        });
        let changed = text.changed.clone();
        let id = engine.register_resource(
            &entry.path,
            &entry.title,
            allowed,
            entry.content_format,
            move |ctx: &RequestContext, req: &Message, resp: &mut Message| text.handle(ctx, req, resp),
            notifier,
        )?;
        tracing::debug!(path = %entry.path, ?allowed, observable = entry.observable, "text resource registered");
        self.installed.push(Installed {
            id,
            path: entry.path.clone(),
            changed: entry.observable.then_some(changed),
        });
        Ok(())
    }

    fn install_uptime<T: Transport, C: Clock>(
        &mut self,
        engine: &mut CoapEngine<T, C>,
        started: Instant,
    ) -> Result<(), NodeError> {
        let uptime = move || started.elapsed().as_secs().to_string().into_bytes();
        let notifier = move |_: &Observer, msg: &mut Message| {
            msg.msg_type = MessageType::Non;
            set_content_format(msg, Some(content_format::TEXT_PLAIN));
            msg.payload = uptime();
            HandlerResult::Ok
        };
        let id = engine.register_resource(
            UPTIME_PATH,
            "Uptime",
            AllowedMethods::GET,
            Some(content_format::TEXT_PLAIN),
            move |ctx: &RequestContext, req: &Message, resp: &mut Message| {
                set_content_format(resp, Some(content_format::TEXT_PLAIN));
                ctx.set_payload(req, resp, &uptime());
                HandlerResult::Ok
            },
            Some(Box::new(notifier) as Box<dyn Notifier>),
        )?;
        self.uptime = Some(id);
        self.installed.push(Installed {
            id,
            path: UPTIME_PATH.to_string(),
            changed: None,
        });
        Ok(())
    }

    fn install_upload<T: Transport, C: Clock>(
        &mut self,
        engine: &mut CoapEngine<T, C>,
        started: Instant,
    ) -> Result<(), NodeError> {
        let mut assembler = Block1Assembler::new(UPLOAD_MAX_BODY);
        let mut stored: Vec<u8> = Vec::new();
        let id = engine.register_resource(
            UPLOAD_PATH,
            "Upload",
            AllowedMethods::GET | AllowedMethods::PUT | AllowedMethods::POST,
            Some(content_format::OCTET_STREAM),
            move |ctx: &RequestContext, req: &Message, resp: &mut Message| {
                if req.code == Code::GET {
                    set_content_format(resp, Some(content_format::OCTET_STREAM));
                    ctx.set_payload(req, resp, &stored);
                    return HandlerResult::Ok;
                }
                let now = started.elapsed().as_secs();
                let expired = assembler.expire(now, UPLOAD_IDLE_SECS);
                if expired > 0 {
                    tracing::debug!(expired, "stale uploads discarded");
                }
                match assembler.handle(ctx.remote, req, resp, now) {
                    Block1Outcome::Complete(body) => {
                        tracing::info!(remote = %ctx.remote, bytes = body.len(), "upload complete");
                        stored = body;
                        resp.code = Code::CHANGED;
                        HandlerResult::Ok
                    }
                    Block1Outcome::Continue => HandlerResult::Ok,
                    Block1Outcome::Rejected => HandlerResult::Error,
                }
            },
            None,
        )?;
        self.installed.push(Installed {
            id,
            path: UPLOAD_PATH.to_string(),
            changed: None,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }

    pub fn uptime(&self) -> Option<ResourceId> {
        self.uptime
    }

    pub fn find(&self, path: &str) -> Option<ResourceId> {
        self.installed.iter().find(|r| r.path == path).map(|r| r.id)
    }

    /// Observable resources written since the last call; clears their flags.
    pub fn take_changed(&self) -> Vec<ResourceId> {
        self.installed
            .iter()
            .filter(|r| r.changed.as_ref().is_some_and(|c| c.swap(false, Ordering::SeqCst)))
            .map(|r| r.id)
            .collect()
    }
}
