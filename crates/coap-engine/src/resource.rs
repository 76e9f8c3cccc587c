//! Resource and observer registry.
//!
//! Resources are registered once at startup and live as long as the engine.
//! Each resource owns its observers; notification interactions only hold an
//! [`ObserverId`].

use std::fmt;
use std::net::SocketAddr;
use std::ops::BitOr;

use coap_core::content_format;
use coap_core::message::{Code, Message};
use coap_core::option::OptionList;
use coap_core::types::Token;

use crate::blockwise;
use crate::error::EngineError;
use crate::transport::{MetaInfo, SocketHandle};

/// Update counter and Observe values are 24 bits on the wire.
pub const OBSERVE_SEQUENCE_MASK: u32 = 0x00FF_FFFF;

pub const WELL_KNOWN_CORE: &str = ".well-known/core";

// ======================================================================== //
// Handler API
// ======================================================================== //

/// Outcome of a request handler or notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    Ok,
    /// Not ready yet; the engine re-polls the handler later.
    Postpone,
    Error,
}

/// Per-request information passed to handlers.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub socket: SocketHandle,
    pub remote: SocketAddr,
    pub meta: MetaInfo,
    /// Largest payload that fits one response datagram.
    pub max_chunk: usize,
}

impl RequestContext {
    /// Set `body` on `response`, slicing it per the request's Block2 option.
    pub fn set_payload(&self, request: &Message, response: &mut Message, body: &[u8]) {
        blockwise::set_payload_checked(Some(request), response, body, self.max_chunk);
    }
}

pub trait RequestHandler: Send {
    fn handle(&mut self, ctx: &RequestContext, request: &Message, response: &mut Message) -> HandlerResult;
}

impl<F> RequestHandler for F
where
    F: FnMut(&RequestContext, &Message, &mut Message) -> HandlerResult + Send,
{
    fn handle(&mut self, ctx: &RequestContext, request: &Message, response: &mut Message) -> HandlerResult {
        self(ctx, request, response)
    }
}

/// Produces the body of a notification for one observer.
pub trait Notifier: Send {
    fn notify(&mut self, observer: &Observer, response: &mut Message) -> HandlerResult;
}

impl<F> Notifier for F
where
    F: FnMut(&Observer, &mut Message) -> HandlerResult + Send,
{
    fn notify(&mut self, observer: &Observer, response: &mut Message) -> HandlerResult {
        self(observer, response)
    }
}

pub(crate) enum ResourceHandler {
    User(Box<dyn RequestHandler>),
    /// Built-in `/.well-known/core` listing.
    Discovery,
}

// ======================================================================== //
// Methods
// ======================================================================== //

/// Bitmask of request methods a resource accepts.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AllowedMethods(u8);

impl AllowedMethods {
    pub const NONE: AllowedMethods = AllowedMethods(0);
    pub const GET: AllowedMethods = AllowedMethods(1);
    pub const POST: AllowedMethods = AllowedMethods(2);
    pub const PUT: AllowedMethods = AllowedMethods(4);
    pub const DELETE: AllowedMethods = AllowedMethods(8);
    pub const ALL: AllowedMethods = AllowedMethods(0x0F);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: AllowedMethods) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Whether the request method `code` is allowed. Unknown methods never are.
    pub fn allows(self, code: Code) -> bool {
        Self::from_code(code).is_some_and(|m| self.contains(m))
    }

    pub fn from_code(code: Code) -> Option<AllowedMethods> {
        match code {
            Code::GET => Some(Self::GET),
            Code::POST => Some(Self::POST),
            Code::PUT => Some(Self::PUT),
            Code::DELETE => Some(Self::DELETE),
            _ => None,
        }
    }

    /// Parse a method name (case-insensitive).
    pub fn from_name(name: &str) -> Option<AllowedMethods> {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::GET),
            "POST" => Some(Self::POST),
            "PUT" => Some(Self::PUT),
            "DELETE" => Some(Self::DELETE),
            _ => None,
        }
    }
}

impl BitOr for AllowedMethods {
    type Output = AllowedMethods;

    fn bitor(self, rhs: Self) -> Self::Output {
        AllowedMethods(self.0 | rhs.0)
    }
}

impl fmt::Debug for AllowedMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::GET, "GET"),
            (Self::POST, "POST"),
            (Self::PUT, "PUT"),
            (Self::DELETE, "DELETE"),
        ]
        .iter()
        .filter(|(m, _)| self.contains(*m))
        .map(|(_, n)| *n)
        .collect();
        write!(f, "AllowedMethods({})", names.join("|"))
    }
}

// ======================================================================== //
// Resource and observer
// ======================================================================== //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u32);

/// A client registered for notifications on a resource (RFC 7641).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observer {
    pub id: ObserverId,
    pub socket: SocketHandle,
    pub remote: SocketAddr,
    pub token: Token,
    pub fail_count: u8,
    /// NON notifications since the last CON.
    pub non_count: u8,
    /// Uri-Query options of the registering request.
    pub extra_options: OptionList,
}

impl Observer {
    pub fn same_endpoint(&self, socket: SocketHandle, remote: SocketAddr) -> bool {
        self.socket == socket && self.remote == remote
    }
}

pub struct Resource {
    pub uri: OptionList,
    pub description: String,
    pub update_counter: u32,
    pub allowed: AllowedMethods,
    pub content_format: Option<u16>,
    pub(crate) handler: ResourceHandler,
    pub(crate) notifier: Option<Box<dyn Notifier>>,
    pub observers: Vec<Observer>,
}

impl Resource {
    pub fn is_observable(&self) -> bool {
        self.notifier.is_some()
    }

    pub fn path(&self) -> String {
        self.uri.uri_path_string()
    }

    pub fn observer(&self, id: ObserverId) -> Option<&Observer> {
        self.observers.iter().find(|o| o.id == id)
    }

    pub(crate) fn bump_update_counter(&mut self) -> u32 {
        self.update_counter = (self.update_counter + 1) & OBSERVE_SEQUENCE_MASK;
        self.update_counter
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("path", &self.path())
            .field("description", &self.description)
            .field("allowed", &self.allowed)
            .field("observable", &self.is_observable())
            .field("observers", &self.observers.len())
            .finish()
    }
}

// ======================================================================== //
// Registry
// ======================================================================== //

#[derive(Default)]
pub struct ResourceRegistry {
    resources: Vec<Resource>,
    next_observer_id: u32,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub(crate) fn register(
        &mut self,
        path: &str,
        description: &str,
        allowed: AllowedMethods,
        content_format: Option<u16>,
        handler: ResourceHandler,
        notifier: Option<Box<dyn Notifier>>,
    ) -> Result<ResourceId, EngineError> {
        if allowed.is_empty() {
            return Err(EngineError::Argument("resource allows no methods"));
        }
        let uri = OptionList::from_uri(path)?;
        if self.find(&uri).is_some() {
            return Err(EngineError::Argument("resource path already registered"));
        }
        let id = ResourceId(self.resources.len());
        self.resources.push(Resource {
            uri,
            description: description.to_string(),
            update_counter: 0,
            allowed,
            content_format,
            handler,
            notifier,
            observers: Vec::new(),
        });
        Ok(id)
    }

    /// Resource whose Uri-Path equals the request's. Other options are ignored.
    pub fn find(&self, options: &OptionList) -> Option<ResourceId> {
        self.resources
            .iter()
            .position(|r| r.uri.uri_path_eq(options))
            .map(ResourceId)
    }


    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.resources.iter().enumerate().map(|(i, r)| (ResourceId(i), r))
    }

    pub fn observer_count(&self) -> usize {
        self.resources.iter().map(|r| r.observers.len()).sum()
    }

    /// Register an observer, replacing any with the same `(socket, remote)`.
    ///
    /// Returns the new observer's id and the replaced observer, if any.
    pub(crate) fn add_observer(
        &mut self,
        rid: ResourceId,
        socket: SocketHandle,
        remote: SocketAddr,
        token: Token,
        extra_options: OptionList,
        max_observers: usize,
    ) -> Result<(ObserverId, Option<Observer>), EngineError> {
        let total = self.observer_count();
        let id = ObserverId(self.next_observer_id);
        let resource = self
            .resources
            .get_mut(rid.0)
            .ok_or(EngineError::NotFound("resource"))?;

        let replaced = match resource.observers.iter().position(|o| o.same_endpoint(socket, remote)) {
            Some(pos) => Some(resource.observers.remove(pos)),
            None if total >= max_observers => return Err(EngineError::OutOfMemory("observers")),
            None => None,
        };
        resource.observers.push(Observer {
            id,
            socket,
            remote,
            token,
            fail_count: 0,
            non_count: 0,
            extra_options,
        });
        self.next_observer_id = self.next_observer_id.wrapping_add(1);
        Ok((id, replaced))
    }

    pub(crate) fn remove_observer_by_endpoint(
        &mut self,
        rid: ResourceId,
        socket: SocketHandle,
        remote: SocketAddr,
    ) -> Option<Observer> {
        let resource = self.resources.get_mut(rid.0)?;
        let pos = resource.observers.iter().position(|o| o.same_endpoint(socket, remote))?;
        Some(resource.observers.remove(pos))
    }

    pub(crate) fn remove_observer(&mut self, rid: ResourceId, oid: ObserverId) -> Option<Observer> {
        let resource = self.resources.get_mut(rid.0)?;
        let pos = resource.observers.iter().position(|o| o.id == oid)?;
        Some(resource.observers.remove(pos))
    }

    pub fn observer(&self, rid: ResourceId, oid: ObserverId) -> Option<&Observer> {
        self.get(rid)?.observer(oid)
    }

    pub(crate) fn observer_mut(&mut self, rid: ResourceId, oid: ObserverId) -> Option<&mut Observer> {
        self.resources
            .get_mut(rid.0)?
            .observers
            .iter_mut()
            .find(|o| o.id == oid)
    }
}

// ======================================================================== //
// Link format (RFC 6690)
// ======================================================================== //

/// Render the `/.well-known/core` body for every user resource.
pub fn link_format<'a>(resources: impl Iterator<Item = &'a Resource>) -> Vec<u8> {
    let mut links = Vec::new();
    for resource in resources {
        if matches!(resource.handler, ResourceHandler::Discovery) {
            continue;
        }
        let mut link = format!("<{}>", resource.path());
        if !resource.description.is_empty() {
            link.push_str(&format!(";title=\"{}\"", resource.description));
        }
        if let Some(ct) = resource.content_format {
            link.push_str(&format!(";ct={ct}"));
        }
        if resource.is_observable() {
            link.push_str(";obs");
        }
        links.push(link);
    }
    links.join(",").into_bytes()
}

pub(crate) const DISCOVERY_CONTENT_FORMAT: u16 = content_format::LINK_FORMAT;

#[cfg(test)]
mod tests {
    use super::*;
    use coap_core::option::number::{URI_PATH, URI_QUERY};

    fn remote(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn ok_handler() -> ResourceHandler {
        ResourceHandler::User(Box::new(
            |_: &RequestContext, _: &Message, _: &mut Message| HandlerResult::Ok,
        ))
    }

    fn notifier() -> Box<dyn Notifier> {
        Box::new(|_: &Observer, _: &mut Message| HandlerResult::Ok)
    }

    #[test]
    fn test_allowed_methods() {
        let m = AllowedMethods::GET | AllowedMethods::PUT;
        assert!(m.allows(Code::GET));
        assert!(m.allows(Code::PUT));
        assert!(!m.allows(Code::POST));
        assert!(!m.allows(Code(0x05)));
        assert!(AllowedMethods::NONE.is_empty());
        assert_eq!(AllowedMethods::from_name("delete"), Some(AllowedMethods::DELETE));
        assert_eq!(format!("{m:?}"), "AllowedMethods(GET|PUT)");
    }

    #[test]
    fn test_register_requires_methods() {
        let mut reg = ResourceRegistry::new();
        let err = reg
            .register("a", "", AllowedMethods::NONE, None, ok_handler(), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Argument(_)));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_find_compares_only_uri_path() {
        let mut reg = ResourceRegistry::new();
        let root = reg.register("", "root", AllowedMethods::GET, None, ok_handler(), None).unwrap();
        let temp = reg
            .register("sensors/temp", "", AllowedMethods::GET, None, ok_handler(), None)
            .unwrap();

        let mut request = OptionList::from_uri("sensors/temp?unit=c").unwrap();
        request.insert_uint(coap_core::option::number::ACCEPT, 0);
        assert_eq!(reg.find(&request), Some(temp));
        assert_eq!(reg.find(&OptionList::new()), Some(root));

        let mut partial = OptionList::new();
        partial.insert(URI_PATH, b"sensors").unwrap();
        assert_eq!(reg.find(&partial), None);
        assert!(request.contains(URI_QUERY));
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let mut reg = ResourceRegistry::new();
        reg.register("a", "", AllowedMethods::GET, None, ok_handler(), None).unwrap();
        assert!(reg.register("/a", "", AllowedMethods::GET, None, ok_handler(), None).is_err());
    }

    #[test]
    fn test_observer_identity_is_endpoint() {
        let mut reg = ResourceRegistry::new();
        let rid = reg
            .register("obs", "", AllowedMethods::GET, None, ok_handler(), Some(notifier()))
            .unwrap();

        let t1 = Token::from_slice(&[1]).unwrap();
        let t2 = Token::from_slice(&[2]).unwrap();
        let (first, replaced) = reg
            .add_observer(rid, SocketHandle(0), remote(1000), t1, OptionList::new(), 8)
            .unwrap();
        assert!(replaced.is_none());
        let (second, replaced) = reg
            .add_observer(rid, SocketHandle(0), remote(1000), t2, OptionList::new(), 8)
            .unwrap();
        assert_eq!(replaced.unwrap().id, first);
        assert_ne!(first, second);

        let resource = reg.get(rid).unwrap();
        assert_eq!(resource.observers.len(), 1);
        assert_eq!(resource.observers[0].token, t2);

        // different socket is a different observer
        reg.add_observer(rid, SocketHandle(1), remote(1000), t1, OptionList::new(), 8)
            .unwrap();
        assert_eq!(reg.observer_count(), 2);
    }

    #[test]
    fn test_observer_capacity() {
        let mut reg = ResourceRegistry::new();
        let rid = reg
            .register("obs", "", AllowedMethods::GET, None, ok_handler(), Some(notifier()))
            .unwrap();
        reg.add_observer(rid, SocketHandle(0), remote(1), Token::EMPTY, OptionList::new(), 1)
            .unwrap();
        assert_eq!(
            reg.add_observer(rid, SocketHandle(0), remote(2), Token::EMPTY, OptionList::new(), 1)
                .unwrap_err(),
            EngineError::OutOfMemory("observers")
        );
        // replacing an existing observer does not need a free slot
        assert!(
            reg.add_observer(rid, SocketHandle(0), remote(1), Token::EMPTY, OptionList::new(), 1)
                .is_ok()
        );
    }

    #[test]
    fn test_remove_observer() {
        let mut reg = ResourceRegistry::new();
        let rid = reg
            .register("obs", "", AllowedMethods::GET, None, ok_handler(), Some(notifier()))
            .unwrap();
        let (oid, _) = reg
            .add_observer(rid, SocketHandle(0), remote(1), Token::EMPTY, OptionList::new(), 4)
            .unwrap();
        assert!(reg.observer(rid, oid).is_some());
        assert!(reg.remove_observer_by_endpoint(rid, SocketHandle(0), remote(2)).is_none());
        assert_eq!(reg.remove_observer(rid, oid).unwrap().id, oid);
        assert!(reg.remove_observer(rid, oid).is_none());
    }

    #[test]
    fn test_update_counter_wraps_at_24_bits() {
        let mut reg = ResourceRegistry::new();
        let rid = reg.register("c", "", AllowedMethods::GET, None, ok_handler(), None).unwrap();
        let resource = reg.get_mut(rid).unwrap();
        resource.update_counter = OBSERVE_SEQUENCE_MASK;
        assert_eq!(resource.bump_update_counter(), 0);
        assert_eq!(resource.bump_update_counter(), 1);
    }

    #[test]
    fn test_link_format() {
        let mut reg = ResourceRegistry::new();
        reg.register(WELL_KNOWN_CORE, "", AllowedMethods::GET, None, ResourceHandler::Discovery, None)
            .unwrap();
        reg.register("sensors/temp", "Temperature", AllowedMethods::GET, Some(0), ok_handler(), Some(notifier()))
            .unwrap();
        reg.register("led", "", AllowedMethods::PUT, None, ok_handler(), None).unwrap();

        let body = link_format(reg.iter().map(|(_, r)| r));
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "</sensors/temp>;title=\"Temperature\";ct=0;obs,</led>"
        );
    }
}
