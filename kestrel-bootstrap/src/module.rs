use di::ServiceCollection;

/// a module used for di configuration.
///
/// Modules run when [`Bootstrap::service_provider`](crate::bootstrap::Bootstrap::service_provider)
/// builds the provider, after the base services are registered.
///
/// # Example
/// ```
/// use di::*;
/// use kestrel_bootstrap::module::Module;
///
/// pub struct Greeter;
/// pub struct GreeterModule;
///
/// impl Module for GreeterModule {
///     fn configure(&self, binder: &mut ServiceCollection) {
///         binder.add(singleton_as_self::<Greeter>().from(|_| Ref::new(Greeter)));
///     }
/// }
/// ```
pub trait Module: Send + Sync {
    fn configure(&self, binder: &mut ServiceCollection);
}
