//! Declarative method tables.

/// Declare method marker types.
///
/// Each entry becomes a unit struct implementing [`RequestMethod`] or
/// [`SubscriptionMethod`].
///
/// ```rust
/// use hostlink_core::{methods, Registry};
///
/// methods! {
///     /// Read a value from host storage.
///     pub request StorageRead("storage_read") {
///         request: String,
///         response: Option<String>,
///     }
///
///     /// Stream balance updates.
///     pub subscription Balance("balance") {
///         start: String,
///         receive: u64,
///     }
/// }
///
/// let registry = Registry::builder()
///     .request::<StorageRead>()
///     .subscription::<Balance>()
///     .build()
///     .unwrap();
/// assert!(registry.by_name("balance_receive").is_some());
/// ```
///
/// [`RequestMethod`]: crate::RequestMethod
/// [`SubscriptionMethod`]: crate::SubscriptionMethod
#[macro_export]
macro_rules! methods {
    () => {};
    (
        $(#[$meta:meta])*
        $vis:vis request $name:ident($wire:literal) {
            request: $req:ty,
            response: $resp:ty $(,)?
        }
        $($rest:tt)*
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        $vis struct $name;

        impl $crate::RequestMethod for $name {
            const NAME: &'static str = $wire;
            type Request = $req;
            type Response = $resp;
        }

        $crate::methods! { $($rest)* }
    };
    (
        $(#[$meta:meta])*
        $vis:vis subscription $name:ident($wire:literal) {
            start: $start:ty,
            receive: $recv:ty $(,)?
        }
        $($rest:tt)*
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        $vis struct $name;

        impl $crate::SubscriptionMethod for $name {
            const NAME: &'static str = $wire;
            type Start = $start;
            type Receive = $recv;
        }

        $crate::methods! { $($rest)* }
    };
}

#[cfg(test)]
mod tests {
    use crate::{RequestMethod, SubscriptionMethod};

    methods! {
        request Ping("ping") { request: u32, response: u32 }
        subscription Clock("clock") { start: (), receive: u64 }
    }

    #[test]
    fn expands_marker_types() {
        assert_eq!(<Ping as RequestMethod>::NAME, "ping");
        assert_eq!(<Clock as SubscriptionMethod>::NAME, "clock");
    }
}
