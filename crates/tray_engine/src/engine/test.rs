use std::{
    cell::RefCell,
    collections::{BTreeMap, HashSet},
    rc::Rc,
};

use maplit::{btreemap, hashset};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::*;

/// Everything the fake collaborators observed.
#[derive(Default)]
struct World {
    created: Vec<(PluginId, AppletId)>,
    teardowns: Vec<AppletId>,
    uninstalled: HashSet<PluginId>,
    groups: BTreeMap<AppletId, PluginId>,
    erased: Vec<AppletId>,
}

type SharedWorld = Rc<RefCell<World>>;

struct FakeApplet {
    identity: AppletId,
    world: SharedWorld,
}

impl Applet for FakeApplet {
    fn identity(&self) -> AppletId {
        self.identity
    }

    fn request_teardown(&mut self) {
        self.world.borrow_mut().teardowns.push(self.identity);
    }

    fn is_ready(&self) -> bool {
        true
    }
}

struct FakeFactory(SharedWorld);

impl AppletFactory for FakeFactory {
    fn create(&mut self, plugin: &PluginDescriptor, identity: AppletId) -> Result<Box<dyn Applet>> {
        let mut world = self.0.borrow_mut();
        if world.uninstalled.contains(&plugin.id) {
            return Err(Error::NotInstalled(plugin.id.clone()));
        }
        world.created.push((plugin.id.clone(), identity));
        Ok(Box::new(FakeApplet { identity, world: self.0.clone() }))
    }
}

struct FakeStore(SharedWorld);

impl AppletStore for FakeStore {
    fn load_groups(&self) -> Result<Vec<(AppletId, PluginId)>> {
        Ok(self.0.borrow().groups.iter().map(|(id, plugin)| (*id, plugin.clone())).collect())
    }

    fn record_group(&mut self, identity: AppletId, plugin: &PluginId) -> Result<()> {
        self.0.borrow_mut().groups.insert(identity, plugin.clone());
        Ok(())
    }

    fn erase_group(&mut self, identity: AppletId) -> Result<()> {
        let mut world = self.0.borrow_mut();
        world.groups.remove(&identity);
        world.erased.push(identity);
        Ok(())
    }
}

type TestEngine = LifecycleEngine<FakeFactory, FakeStore>;

fn plugin(id: &str, name: &str, activation: Option<&str>) -> PluginMetadata {
    PluginMetadata {
        id: Some(id.to_owned()),
        name: Some(name.to_owned()),
        notification_area: true,
        dbus_activation: activation.map(str::to_owned),
        ..Default::default()
    }
}

fn setup_with(metas: Vec<PluginMetadata>, world: World) -> (TestEngine, SharedWorld, UnboundedReceiver<EngineEvent>) {
    let world = Rc::new(RefCell::new(world));
    let (send, recv) = tokio::sync::mpsc::unbounded_channel();
    let engine = LifecycleEngine::new(&metas, FakeFactory(world.clone()), FakeStore(world.clone()), send);
    (engine, world, recv)
}

fn setup(metas: Vec<PluginMetadata>) -> (TestEngine, SharedWorld, UnboundedReceiver<EngineEvent>) {
    setup_with(metas, World::default())
}

fn allow(ids: &[&str]) -> AllowList {
    ids.iter().copied().collect()
}

fn drain(recv: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = recv.try_recv() {
        events.push(event);
    }
    events
}

fn removed(plugin: &str, identity: u32) -> EngineEvent {
    EngineEvent::AppletRemoved { plugin: plugin.into(), identity: AppletId(identity) }
}

fn added(plugin: &str, identity: u32) -> EngineEvent {
    EngineEvent::AppletAdded { plugin: plugin.into(), identity: AppletId(identity) }
}

const SESSION: BusDomain = BusDomain::Session;

#[test]
fn test_startup_reconciliation_starts_static_plugins_only() {
    let (mut engine, world, mut recv) = setup(vec![
        plugin("clock", "Clock", None),
        plugin("media", "Media", Some("org.mpris.MediaPlayer2.*")),
        plugin("battery", "Battery", None),
    ]);
    engine.start(allow(&["clock", "media"]));

    assert_eq!(vec![(PluginId::from("clock"), AppletId(0))], world.borrow().created);
    assert_eq!(LifecycleState::Running, engine.state_of("clock"));
    assert_eq!(LifecycleState::Absent, engine.state_of("media"));
    assert_eq!(LifecycleState::Absent, engine.state_of("battery"));
    assert_eq!(vec![added("clock", 0)], drain(&mut recv));
}

#[test]
fn test_at_most_one_instance() {
    let (mut engine, world, _recv) = setup(vec![plugin("media", "Media", Some("org.example.*"))]);
    engine.start(allow(&["media"]));
    let media = PluginId::from("media");

    engine.ensure_running(&media);
    engine.ensure_running(&media);
    engine.service_registered(SESSION, "org.example.a");
    engine.ensure_stopped(&media);
    engine.ensure_running(&media);

    assert_eq!(1, world.borrow().created.len());
    assert_eq!(1, engine.instances().count());
    assert_eq!(LifecycleState::Stopping, engine.state_of("media"));
}

#[test]
fn test_stop_keeps_identity() {
    let (mut engine, world, _recv) = setup(vec![plugin("clock", "Clock", None)]);
    engine.start(allow(&["clock"]));
    let clock = PluginId::from("clock");
    let first = engine.instance("clock").unwrap().identity;

    engine.ensure_stopped(&clock);
    engine.teardown_finished("clock", first);
    assert_eq!(LifecycleState::Absent, engine.state_of("clock"));

    engine.ensure_running(&clock);
    assert_eq!(first, engine.instance("clock").unwrap().identity);
    assert!(world.borrow().erased.is_empty());
    assert_eq!(Some(&clock), world.borrow().groups.get(&first));
}

#[test]
fn test_disallowing_erases_identity() {
    let (mut engine, world, mut recv) = setup(vec![plugin("clock", "Clock", None)]);
    engine.start(allow(&["clock"]));
    let first = engine.instance("clock").unwrap().identity;
    drain(&mut recv);

    assert!(engine.set_allowed(allow(&[])));
    assert_eq!(LifecycleState::Stopping, engine.state_of("clock"));
    assert_eq!(vec![first], world.borrow().erased);
    assert_eq!(vec![first], world.borrow().teardowns);
    assert_eq!(None, engine.recycled_identity("clock"));
    assert_eq!(vec![removed("clock", first.0), EngineEvent::AllowedChanged(allow(&[]))], drain(&mut recv));

    engine.teardown_finished("clock", first);
    engine.set_allowed(allow(&["clock"]));
    let second = engine.instance("clock").unwrap().identity;
    assert_ne!(first, second);
}

#[test]
fn test_refcount_over_multiple_services() {
    let (mut engine, world, mut recv) = setup(vec![plugin("media", "Media", Some("org.example.*"))]);
    engine.start(allow(&["media"]));

    engine.service_registered(SESSION, "org.example.a");
    engine.service_registered(SESSION, "org.example.b");
    engine.service_unregistered(SESSION, "org.example.a");

    assert_eq!(1, world.borrow().created.len());
    assert_eq!(LifecycleState::Running, engine.state_of("media"));
    assert_eq!(1, engine.activation().count("media"));
    assert_eq!(vec![added("media", 0)], drain(&mut recv));

    engine.service_unregistered(SESSION, "org.example.b");
    assert_eq!(0, engine.activation().count("media"));
    assert_eq!(LifecycleState::Stopping, engine.state_of("media"));
    assert_eq!(vec![AppletId(0)], world.borrow().teardowns);
    assert_eq!(vec![removed("media", 0)], drain(&mut recv));
    // stopping because a service left keeps the configuration
    assert!(world.borrow().erased.is_empty());
}

#[test]
fn test_same_service_name_on_both_buses_counts_twice() {
    let (mut engine, _world, _recv) = setup(vec![plugin("connect", "Connect", Some("org.kde.kdeconnect"))]);
    engine.start(allow(&["connect"]));

    engine.service_registered(BusDomain::Session, "org.kde.kdeconnect");
    engine.service_registered(BusDomain::System, "org.kde.kdeconnect");
    engine.service_unregistered(BusDomain::System, "org.kde.kdeconnect");
    assert_eq!(LifecycleState::Running, engine.state_of("connect"));
    engine.service_unregistered(BusDomain::Session, "org.kde.kdeconnect");
    assert_eq!(LifecycleState::Stopping, engine.state_of("connect"));
}

#[test]
fn test_duplicate_registration_is_counted_once() {
    let (mut engine, _world, _recv) = setup(vec![plugin("media", "Media", Some("org.example.*"))]);
    engine.start(allow(&["media"]));

    engine.service_registered(SESSION, "org.example.a");
    engine.service_registered(SESSION, "org.example.a");
    assert_eq!(1, engine.activation().count("media"));
    engine.service_unregistered(SESSION, "org.example.a");
    engine.service_unregistered(SESSION, "org.example.a");
    assert_eq!(LifecycleState::Stopping, engine.state_of("media"));
}

#[test]
fn test_start_request_while_stopping_is_dropped() {
    let (mut engine, world, _recv) = setup(vec![plugin("media", "Media", Some("org.example.*"))]);
    engine.start(allow(&["media"]));

    engine.service_registered(SESSION, "org.example.a");
    engine.service_unregistered(SESSION, "org.example.a");
    engine.service_registered(SESSION, "org.example.a");
    assert_eq!(1, world.borrow().created.len());
    assert_eq!(LifecycleState::Stopping, engine.state_of("media"));

    engine.teardown_finished("media", AppletId(0));
    assert_eq!(LifecycleState::Absent, engine.state_of("media"));

    // the next activation brings it back, with the same configuration
    engine.service_registered(SESSION, "org.example.b");
    assert_eq!(LifecycleState::Running, engine.state_of("media"));
    assert_eq!(vec![(PluginId::from("media"), AppletId(0)); 2], world.borrow().created);
}

#[test]
fn test_display_name_duplicates_are_started_once() {
    let (mut engine, world, _recv) = setup(vec![plugin("org.z.volume", "Volume", None), plugin("org.a.volume", "Volume", None)]);
    engine.start(allow(&["org.z.volume", "org.a.volume"]));

    assert_eq!(vec![(PluginId::from("org.a.volume"), AppletId(0))], world.borrow().created);
    assert_eq!(LifecycleState::Absent, engine.state_of("org.z.volume"));
}

#[test]
fn test_anonymous_services_are_ignored() {
    let (mut engine, world, _recv) = setup(vec![plugin("all", "All", Some("*"))]);
    engine.start(allow(&["all"]));

    engine.service_registered(SESSION, ":1.42");
    assert!(world.borrow().created.is_empty());
    assert_eq!(0, engine.activation().count("all"));
    engine.service_unregistered(SESSION, ":1.42");
}

#[test]
fn test_equal_allow_list_is_a_noop() {
    let (mut engine, world, mut recv) = setup(vec![plugin("clock", "Clock", None)]);
    engine.start(allow(&["clock"]));
    let identity = world.borrow().created[0].1;
    engine.teardown_finished("clock", identity);
    drain(&mut recv);

    assert!(!engine.set_allowed(allow(&["clock", "clock"])));
    assert!(drain(&mut recv).is_empty());
    // no reconciliation either, otherwise clock would have been restarted
    assert_eq!(LifecycleState::Absent, engine.state_of("clock"));
}

#[test]
fn test_disallowed_plugins_ignore_services() {
    let (mut engine, world, _recv) = setup(vec![plugin("media", "Media", Some("org.example.*"))]);
    engine.start(allow(&[]));

    engine.service_registered(SESSION, "org.example.a");
    assert!(world.borrow().created.is_empty());
    assert_eq!(0, engine.activation().count("media"));
}

#[test]
fn test_reenabled_plugin_starts_fresh_from_live_services() {
    let (mut engine, world, _recv) = setup(vec![plugin("media", "Media", Some("org.example.*"))]);
    engine.start(allow(&["media"]));
    engine.service_registered(SESSION, "org.example.a");
    engine.service_registered(SESSION, "org.example.b");

    engine.set_allowed(allow(&[]));
    assert_eq!(0, engine.activation().count("media"));
    engine.teardown_finished("media", AppletId(0));
    engine.service_unregistered(SESSION, "org.example.b");

    engine.set_allowed(allow(&["media"]));
    assert_eq!(1, engine.activation().count("media"));
    assert_eq!(LifecycleState::Running, engine.state_of("media"));
    // configuration was erased when it got disallowed
    assert_eq!(AppletId(1), engine.instance("media").unwrap().identity);
    assert_eq!(2, world.borrow().created.len());

    engine.service_unregistered(SESSION, "org.example.a");
    assert_eq!(LifecycleState::Stopping, engine.state_of("media"));
}

#[test]
fn test_failed_instantiation_stays_absent() {
    let world = World { uninstalled: hashset! { "clock".into() }, ..World::default() };
    let (mut engine, world, mut recv) = setup_with(vec![plugin("clock", "Clock", None)], world);
    engine.start(allow(&["clock"]));

    assert_eq!(LifecycleState::Absent, engine.state_of("clock"));
    assert_eq!(None, engine.recycled_identity("clock"));
    assert!(world.borrow().groups.is_empty());
    assert!(drain(&mut recv).is_empty());

    // retried on the next trigger
    world.borrow_mut().uninstalled.clear();
    engine.set_allowed(allow(&[]));
    engine.set_allowed(allow(&["clock"]));
    assert_eq!(LifecycleState::Running, engine.state_of("clock"));
}

#[test]
fn test_stored_groups_are_recycled() {
    let world = World { groups: btreemap! { AppletId(12) => "clock".into(), AppletId(4) => "gone".into() }, ..World::default() };
    let (mut engine, world, _recv) = setup_with(vec![plugin("clock", "Clock", None), plugin("battery", "Battery", None)], world);
    engine.start(allow(&["clock", "battery"]));

    assert_eq!(AppletId(12), engine.instance("clock").unwrap().identity);
    assert_eq!(AppletId(13), engine.instance("battery").unwrap().identity);
    assert_eq!(Some(&PluginId::from("battery")), world.borrow().groups.get(&AppletId(13)));
}

#[test]
fn test_exhausted_identities_leave_plugin_absent() {
    let world = World { groups: btreemap! { AppletId(u32::MAX) => "broken".into(), AppletId(u32::MAX - 1) => "clock".into() }, ..World::default() };
    let (mut engine, world, _recv) = setup_with(vec![plugin("clock", "Clock", None), plugin("battery", "Battery", None)], world);
    engine.start(allow(&["clock", "battery"]));

    assert_eq!(AppletId(u32::MAX - 1), engine.instance("clock").unwrap().identity);
    assert_eq!(LifecycleState::Absent, engine.state_of("battery"));
    assert_eq!(vec![(PluginId::from("clock"), AppletId(u32::MAX - 1))], world.borrow().created);
}

#[test]
fn test_unknown_plugin_is_not_started() {
    let (mut engine, world, _recv) = setup(vec![]);
    engine.ensure_running(&"nope".into());
    assert_eq!(LifecycleState::Absent, engine.state_of("nope"));
    assert!(world.borrow().created.is_empty());
}

#[test]
fn test_unexpected_exit_notifies_observers() {
    let (mut engine, _world, mut recv) = setup(vec![plugin("clock", "Clock", None)]);
    engine.start(allow(&["clock"]));
    drain(&mut recv);

    engine.teardown_finished("clock", AppletId(0));
    assert_eq!(LifecycleState::Absent, engine.state_of("clock"));
    assert_eq!(vec![removed("clock", 0)], drain(&mut recv));

    // a stale completion for an identity that isn't running changes nothing
    engine.ensure_running(&"clock".into());
    engine.teardown_finished("clock", AppletId(7));
    assert_eq!(LifecycleState::Running, engine.state_of("clock"));
}

#[test]
fn test_service_event_dispatch() {
    let (mut engine, _world, _recv) = setup(vec![plugin("media", "Media", Some("org.example.*"))]);
    engine.start(allow(&["media"]));

    engine.handle_service_event(ServiceEvent::registered(SESSION, "org.example.a"));
    assert_eq!(LifecycleState::Running, engine.state_of("media"));
    engine.handle_service_event(ServiceEvent::unregistered(SESSION, "org.example.a"));
    assert_eq!(LifecycleState::Stopping, engine.state_of("media"));
}
