use bucket_ecs::{
    core::Config,
    ecs::{Component, EcsError, World},
};

#[derive(Component, Clone, Copy, Debug, PartialEq)]
struct A(u32);

#[derive(Component, Clone, Copy, Debug, PartialEq)]
struct B(f64);

#[derive(Component, Clone, Copy, Debug, PartialEq)]
struct C(u8);

fn world(capacity: usize) -> World {
    World::new(Config {
        chunk_entities_count: capacity,
        worker_threads: 1,
        ..Config::default()
    })
    .unwrap()
}

#[test]
fn component_order_does_not_matter() {
    // Given
    let mut world = world(8);

    // When
    let (_, abc) = world.spawn((A(1), B(2.0), C(3))).unwrap();
    let (_, cab) = world.spawn((C(3), A(1), B(2.0))).unwrap();
    let (_, bca) = world.spawn((B(2.0), C(3), A(1))).unwrap();

    // Then
    assert_eq!(abc.archetype(), cab.archetype());
    assert_eq!(abc.archetype(), bca.archetype());
    assert_eq!(world.archetype_count(), 2);
}

#[test]
fn full_chunk_spills_into_a_new_one() {
    // Given
    let capacity = 4;
    let mut world = world(capacity);

    // When
    let addresses: Vec<_> = (0..=capacity)
        .map(|i| world.spawn((A(i as u32), B(0.0))).unwrap().1)
        .collect();

    // Then
    let archetype = world.storage().archetype(addresses[0].archetype()).unwrap();
    assert_eq!(archetype.chunk_count(), 2);
    assert_eq!(archetype.entity_count(), capacity + 1);
    assert_ne!(addresses[0].chunk(), addresses[capacity].chunk());
    assert_eq!(addresses[capacity].index(), 0);
}

#[test]
fn draining_recycles_the_archetype() {
    // Given
    let mut world = world(4);
    let addresses: Vec<_> = (0..6).map(|i| world.spawn(A(i)).unwrap().1).collect();
    let archetype = addresses[0].archetype();

    // When
    for address in &addresses {
        assert!(world.destroy(*address));
    }
    world.run_sync_point();

    // Then
    assert!(world.storage().archetype(archetype).is_none());
    assert_eq!(world.archetype_count(), 1);
    assert_eq!(world.entity_count(), 0);

    // And a different signature gets a fresh id
    let (_, other) = world.spawn((B(1.0), C(1))).unwrap();
    assert_ne!(other.archetype(), archetype);
    assert!(world.storage().archetype(archetype).is_none());
}

#[test]
fn destroyed_entities_stay_until_sync_point() {
    // Given
    let mut world = world(4);
    let (entity, address) = world.spawn(A(7)).unwrap();

    // When
    world.destroy(address);

    // Then
    assert_eq!(world.entity(address), Some(entity));
    assert_eq!(world.entity_count(), 1);
    world.run_sync_point();
    assert_eq!(world.locate(entity), None);
}

#[test]
fn removals_compact_chunks() {
    // Given
    let mut world = world(4);
    let addresses: Vec<_> = (0..8).map(|i| world.spawn(A(i)).unwrap().1).collect();
    let archetype = addresses[0].archetype();

    // When - leave two entities in each chunk
    for address in addresses.iter().filter(|address| address.index() >= 2) {
        world.destroy(*address);
    }
    world.run_sync_point();

    // Then
    let archetype = world.storage().archetype(archetype).unwrap();
    assert_eq!(archetype.entity_count(), 4);
    assert_eq!(archetype.chunk_count(), 1);
}

#[test]
fn migration_moves_values_and_keeps_identity() {
    // Given
    let mut world = world(4);
    let (entity, address) = world.spawn((A(5), B(1.5))).unwrap();

    // When
    world.add_component(address, C(9)).unwrap();
    world.remove_component::<B>(address).unwrap();
    world.run_sync_point();

    // Then
    let moved = world.locate(entity).unwrap();
    assert_ne!(moved.archetype(), address.archetype());
    assert_eq!(world.get::<A>(moved), Some(&A(5)));
    assert_eq!(world.get::<C>(moved), Some(&C(9)));
    assert!(!world.has::<B>(moved));
}

#[test]
fn stale_address_is_rejected() {
    // Given
    let mut world = world(4);
    let (_, address) = world.spawn(A(1)).unwrap();
    world.destroy(address);
    world.run_sync_point();

    // When
    let result = world.try_set(address, A(2));

    // Then
    assert!(matches!(result, Err(EcsError::InvalidAddress)));
    assert!(!world.destroy(address));
}
