use crate::ecs::{
    bitset::BitSet,
    component::{Component, Registry},
    error::Result,
    util::all_tuples,
};

/// Receiver of the component values in a [`Bundle`].
pub trait Target {
    fn apply<C: Component>(&mut self, value: C);
}

/// A set of component values an entity is spawned with: a single component, or a tuple of them.
pub trait Bundle: Send + 'static {
    /// Register every component of the bundle and set its bit in `mask`.
    fn register(registry: &Registry, mask: &mut BitSet) -> Result<()>;

    /// Hand each component value to the target. Takes ownership of the bundle.
    fn apply<T: Target>(self, target: &mut T);
}

impl<C: Component> Bundle for C {
    fn register(registry: &Registry, mask: &mut BitSet) -> Result<()> {
        mask.set(registry.register::<C>()?.index());
        Ok(())
    }

    fn apply<T: Target>(self, target: &mut T) {
        target.apply::<C>(self);
    }
}

impl Bundle for () {
    fn register(_registry: &Registry, _mask: &mut BitSet) -> Result<()> {
        Ok(())
    }

    fn apply<T: Target>(self, _target: &mut T) {}
}

macro_rules! tuple_bundle {
    ($($name: ident),*) => {
        impl<$($name: Bundle),*> Bundle for ($($name,)*) {
            fn register(registry: &Registry, mask: &mut BitSet) -> Result<()> {
                $(<$name as Bundle>::register(registry, mask)?;)*
                Ok(())
            }

            fn apply<CT: Target>(self, target: &mut CT) {
                #[allow(non_snake_case)]
                let ( $($name,)* ) = self;
                $(<$name as Bundle>::apply($name, target);)*
            }
        }
    }
}

// Bundles of up to 16 components.
all_tuples!(tuple_bundle);
