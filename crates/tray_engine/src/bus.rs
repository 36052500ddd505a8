use futures::{Stream, StreamExt};
use tokio::sync::mpsc::UnboundedSender;

/// The two independent message buses services can live on.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, derive_more::Display)]
pub enum BusDomain {
    #[display("session")]
    Session,
    #[display("system")]
    System,
}

impl BusDomain {
    pub const ALL: [BusDomain; 2] = [BusDomain::Session, BusDomain::System];

    pub async fn connect(self) -> zbus::Result<zbus::Connection> {
        match self {
            BusDomain::Session => zbus::Connection::session().await,
            BusDomain::System => zbus::Connection::system().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Registered,
    Unregistered,
}

/// A service appearing on or vanishing from a bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub domain: BusDomain,
    pub service: String,
    pub presence: Presence,
}

impl ServiceEvent {
    pub fn registered(domain: BusDomain, service: impl Into<String>) -> Self {
        ServiceEvent { domain, service: service.into(), presence: Presence::Registered }
    }

    pub fn unregistered(domain: BusDomain, service: impl Into<String>) -> Self {
        ServiceEvent { domain, service: service.into(), presence: Presence::Unregistered }
    }

    /// Interpret a `NameOwnerChanged` signal. A name that is handed over from one owner to
    /// another stays present, so that yields no event.
    pub fn from_owner_change(domain: BusDomain, service: &str, old_owner: Option<&str>, new_owner: Option<&str>) -> Option<Self> {
        let old_owner = old_owner.filter(|o| !o.is_empty());
        let new_owner = new_owner.filter(|o| !o.is_empty());
        match (old_owner, new_owner) {
            (None, _) => Some(ServiceEvent::registered(domain, service)),
            (Some(_), None) => Some(ServiceEvent::unregistered(domain, service)),
            (Some(_), Some(_)) => None,
        }
    }
}

/// Report every service on `con` as registered, then keep reporting services as they come and
/// go, until the connection goes away.
///
/// If the initial listing fails, we carry on with the subscription, so things recover with the
/// next change on the bus.
pub async fn watch_services(domain: BusDomain, con: &zbus::Connection, send: UnboundedSender<ServiceEvent>) -> crate::Result<()> {
    let dbus = zbus::fdo::DBusProxy::new(con).await?;

    // subscribe before listing, so nothing that appears in between is lost. Names reported
    // twice are ignored by the engine.
    let owner_changes = dbus.receive_name_owner_changed().await?;

    match dbus.list_names().await {
        Ok(names) => {
            log::debug!("{} services on the {} bus", names.len(), domain);
            for name in names {
                if send.send(ServiceEvent::registered(domain, name.as_str())).is_err() {
                    return Ok(());
                }
            }
        }
        Err(e) => log::warn!("Could not get list of available services on the {} bus: {}", domain, e),
    }

    let owner_changes = owner_changes.map(|sig| -> crate::Result<OwnerChange> {
        let args = sig.args()?;
        let old_owner: &Option<_> = args.old_owner();
        let new_owner: &Option<_> = args.new_owner();
        Ok(OwnerChange {
            service: args.name().to_string(),
            old_owner: old_owner.as_ref().map(|o| o.to_string()),
            new_owner: new_owner.as_ref().map(|o| o.to_string()),
        })
    });
    forward_owner_changes(domain, owner_changes, send).await;
    Ok(())
}

/// The decoded arguments of a `NameOwnerChanged` signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerChange {
    pub service: String,
    pub old_owner: Option<String>,
    pub new_owner: Option<String>,
}

/// Turn owner changes into service events until either side goes away. Signals that can't be
/// decoded are skipped.
pub async fn forward_owner_changes<S>(domain: BusDomain, owner_changes: S, send: UnboundedSender<ServiceEvent>)
where
    S: Stream<Item = crate::Result<OwnerChange>>,
{
    futures::pin_mut!(owner_changes);
    while let Some(change) = owner_changes.next().await {
        let change = match change {
            Ok(change) => change,
            Err(e) => {
                log::warn!("Ignoring malformed NameOwnerChanged signal on the {} bus: {}", domain, e);
                continue;
            }
        };
        let event = ServiceEvent::from_owner_change(domain, &change.service, change.old_owner.as_deref(), change.new_owner.as_deref());
        if let Some(event) = event {
            if send.send(event).is_err() {
                break;
            }
        }
    }
}
