//! Process-wide, once-per-type import binding.
//!
//! Each type gets a slot in a concurrent registry. Binding holds the slot's
//! lock across resolve and publish, so racing binders of one type resolve
//! exactly once and never see a half-built map, while different types bind in
//! parallel.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tracing::{debug, info, info_span, warn};

use super::strategy::{ImportRequest, ResolutionStrategy};
use super::{ImportKind, ImportMap, Importable, Resolution, ResolvedImport};
use crate::error::{LensError, Result};
use crate::types::Address;

type Slot = Arc<Mutex<Option<Arc<ImportMap>>>>;

/// Result of a successful [`ImportBinder::bind`]
#[derive(Debug, Clone)]
pub enum BindOutcome
{
    /// This call resolved and published the map
    Bound(Arc<ImportMap>),
    /// The type was already bound; nothing was resolved
    AlreadyBound(Arc<ImportMap>),
}

impl BindOutcome
{
    pub fn map(&self) -> &Arc<ImportMap>
    {
        match self {
            Self::Bound(map) | Self::AlreadyBound(map) => map,
        }
    }

    pub fn into_map(self) -> Arc<ImportMap>
    {
        match self {
            Self::Bound(map) | Self::AlreadyBound(map) => map,
        }
    }

    pub fn was_already_bound(&self) -> bool
    {
        matches!(self, Self::AlreadyBound(_))
    }
}

/// Registry of bound types and the strategies that bind them
#[derive(Default)]
pub struct ImportBinder
{
    strategies: HashMap<ImportKind, Arc<dyn ResolutionStrategy>>,
    bound: DashMap<TypeId, Slot>,
}

impl ImportBinder
{
    /// A binder with no strategies
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Register `strategy` for its kind, replacing any previous one
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl ResolutionStrategy + 'static) -> Self
    {
        self.register(Arc::new(strategy));
        self
    }

    /// Register a shared strategy for its kind, replacing any previous one
    pub fn register(&mut self, strategy: Arc<dyn ResolutionStrategy>)
    {
        self.strategies.insert(strategy.kind(), strategy);
    }

    /// Resolve and publish every import of `T`, once
    ///
    /// ## Errors
    ///
    /// The first resolution failure, unchanged ([`LensError::SignatureNotFound`],
    /// [`LensError::SymbolNotFound`], [`LensError::NoStrategy`], ...). `T` then
    /// stays unbound and a later call tries again.
    pub fn bind<T: Importable>(&self) -> Result<BindOutcome>
    {
        let slot = self.slot::<T>();
        let _span = info_span!("bind", ty = T::TYPE_NAME).entered();
        let mut published = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(map) = published.as_ref() {
            debug!("already bound");
            return Ok(BindOutcome::AlreadyBound(Arc::clone(map)));
        }

        match self.resolve_all::<T>() {
            Ok(map) => {
                let map = Arc::new(map);
                *published = Some(Arc::clone(&map));
                info!(imports = map.len(), "bound");
                Ok(BindOutcome::Bound(map))
            }
            Err(err) => {
                warn!(error = %err, "bind failed");
                Err(err)
            }
        }
    }

    /// Whether `T` has a published map
    pub fn is_bound<T: Importable>(&self) -> bool
    {
        self.import_map::<T>().is_some()
    }

    /// The published map of `T`
    pub fn import_map<T: Importable>(&self) -> Option<Arc<ImportMap>>
    {
        let slot = Arc::clone(self.bound.get(&TypeId::of::<T>())?.value());
        let published = slot.lock().unwrap_or_else(PoisonError::into_inner);
        published.clone()
    }

    /// Address of one import of a bound type
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::ImportNotBound`] if `T` is unbound or does not
    /// declare `identifier`.
    pub fn address_of<T: Importable>(&self, identifier: &str) -> Result<Address>
    {
        self.import_map::<T>()
            .and_then(|map| map.address_of(identifier))
            .ok_or_else(|| LensError::ImportNotBound {
                type_name: T::TYPE_NAME,
                identifier: identifier.to_string(),
            })
    }

    fn slot<T: Importable>(&self) -> Slot
    {
        Arc::clone(&self.bound.entry(TypeId::of::<T>()).or_default())
    }

    fn resolve_all<T: Importable>(&self) -> Result<ImportMap>
    {
        let mut entries = Vec::with_capacity(T::IMPORTS.len());
        for descriptor in T::IMPORTS {
            let kind = descriptor.resolution().kind();
            let strategy = self
                .strategies
                .get(&kind)
                .ok_or(LensError::NoStrategy(kind.as_str()))?;

            let name = descriptor.compose_name(T::NAMESPACE, T::TYPE_NAME);
            let request = ImportRequest {
                type_name: T::TYPE_NAME,
                descriptor,
                name: &name,
            };
            let address = strategy.resolve(&request)?;
            debug!(import = descriptor.identifier(), %kind, %address, "resolved");

            entries.push(ResolvedImport {
                identifier: descriptor.identifier(),
                name: match descriptor.resolution() {
                    Resolution::ByteSignature(pattern) => pattern.to_string(),
                    Resolution::DebugSymbol => name,
                },
                address,
                kind,
            });
        }
        Ok(ImportMap::new(T::TYPE_NAME, entries))
    }
}

impl fmt::Debug for ImportBinder
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ImportBinder")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .field("types", &self.bound.len())
            .finish()
    }
}
