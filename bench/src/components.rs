//! Component types shared by the benchmarks, sized like typical game data.

use bucket_ecs::ecs::Component;

/// 3D position (12 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 3D velocity (12 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 3D acceleration (12 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Acceleration {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Euler rotation (12 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Rotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 4x4 transformation matrix (64 bytes).
#[derive(Component, Clone, Copy, Debug)]
pub struct Transform {
    pub matrix: [[f32; 4]; 4],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }
}

#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Mass(pub f32);

#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

/// Marks short lived particles.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Particle;

#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Lifetime {
    pub remaining: f32,
    pub total: f32,
}

/// RGBA color (16 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Payload of the fragmentation benchmarks.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Data {
    pub value: f64,
}

macro_rules! define_marker_components {
    ($($name:ident),*) => {
        $(
            #[derive(Component, Clone, Copy, Debug, Default)]
            pub struct $name;
        )*
    };
}

define_marker_components!(MarkerA, MarkerB, MarkerC, MarkerD, MarkerE, MarkerF, MarkerG, MarkerH);
