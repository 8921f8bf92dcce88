//! Conversion path registry.
//!
//! The registry owns the table of instantiated conversion paths and the
//! lists of conversion functions that can populate it. Hard functions are
//! bound to one exact datatype pair; soft functions are keyed by class pair
//! and decide during initialization whether they handle a concrete pair.
//! Soft functions are tried newest first and the first one whose `init`
//! succeeds wins.
//!
//! The registry is single-threaded: paths are shared through `Rc` and all
//! mutation goes through `RefCell`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace, warn};

use crate::conv::array::ArrayConv;
use crate::conv::bitfield::BitfieldConv;
use crate::conv::enums::{EnumConv, EnumNumericConv};
use crate::conv::float::{FloatFloatConv, FloatIntConv, IntFloatConv};
use crate::conv::integer::IntegerConv;
use crate::conv::noop::NoopConv;
use crate::conv::order::{OrderConv, OrderOptConv};
use crate::conv::reference::ReferenceConv;
use crate::conv::string::StringConv;
use crate::datatype::{Datatype, RefLocation, ReferenceType, TypeClass};
use crate::error::{ensure_len, ConvError, Result};
use crate::except::ExceptionHandler;
use crate::path::{
    BackgroundNeed, ConvArgs, ConvCtx, ConversionPath, Converter, ConverterFactory, InitCtx,
    PathRef,
};
use crate::props::TransferProps;
use crate::refclass::{
    ObjectRefClass, OpaqueDiskRefClass, OpaqueMemRefClass, RefClass, RegionRefClass,
};
use crate::traverse::Traversal;

/// Which registrations [`Registry::unregister`] removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Soft,
    Hard,
    All,
}

impl Persistence {
    fn covers_soft(self) -> bool {
        matches!(self, Persistence::Soft | Persistence::All)
    }

    fn covers_hard(self) -> bool {
        matches!(self, Persistence::Hard | Persistence::All)
    }
}

#[derive(Clone)]
struct SoftEntry {
    name: String,
    src: TypeClass,
    dst: TypeClass,
    factory: ConverterFactory,
    is_app: bool,
}

#[derive(Clone)]
struct HardEntry {
    name: String,
    src: Datatype,
    dst: Datatype,
    factory: ConverterFactory,
    is_app: bool,
}

/// Table row. The key and flags live outside the path's `RefCell` so the
/// table can be searched while a path is executing.
struct TableEntry {
    name: String,
    src: Datatype,
    dst: Datatype,
    is_hard: bool,
    path: PathRef,
}

/// Registry of conversion functions and instantiated paths.
pub struct Registry {
    noop: PathRef,
    paths: RefCell<Vec<TableEntry>>,
    soft: RefCell<Vec<SoftEntry>>,
    hard: RefCell<Vec<HardEntry>>,
    ref_classes: RefCell<HashMap<(ReferenceType, RefLocation), Rc<dyn RefClass>>>,
}

fn factory<F>(f: F) -> ConverterFactory
where
    F: Fn() -> Box<dyn Converter> + 'static,
{
    Rc::new(f)
}

fn release(path: &PathRef) {
    match path.try_borrow_mut() {
        Ok(mut p) => {
            if let Err(e) = p.free() {
                warn!("failed to free conversion path `{}`: {e}", p.name());
            }
        }
        Err(_) => warn!("conversion path released while executing"),
    }
}

impl Registry {
    /// Registry with the built-in conversion functions.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_builtins();
        registry
    }

    /// Registry with no conversion functions.
    ///
    /// Equal non-forced types still convert through the no-op path, and the
    /// built-in reference encodings are available.
    pub fn empty() -> Self {
        let noop = ConversionPath::new("no-op", None, None, Box::new(NoopConv), BackgroundNeed::No)
            .hard(true)
            .noop();
        let registry = Self {
            noop: Rc::new(RefCell::new(noop)),
            paths: RefCell::new(Vec::new()),
            soft: RefCell::new(Vec::new()),
            hard: RefCell::new(Vec::new()),
            ref_classes: RefCell::new(HashMap::new()),
        };
        for loc in [RefLocation::Memory, RefLocation::Disk] {
            registry.register_ref_class(ReferenceType::Object, loc, Rc::new(ObjectRefClass));
            registry.register_ref_class(ReferenceType::DatasetRegion, loc, Rc::new(RegionRefClass));
        }
        registry.register_ref_class(ReferenceType::Opaque, RefLocation::Memory, Rc::new(OpaqueMemRefClass));
        registry.register_ref_class(ReferenceType::Opaque, RefLocation::Disk, Rc::new(OpaqueDiskRefClass));
        registry
    }

    fn register_builtins(&self) {
        use TypeClass::*;
        self.add_soft("i_i", Integer, Integer, factory(|| Box::new(IntegerConv)), false);
        self.add_soft("i_f", Integer, Float, factory(|| Box::new(IntFloatConv)), false);
        self.add_soft("f_f", Float, Float, factory(|| Box::new(FloatFloatConv)), false);
        self.add_soft("f_i", Float, Integer, factory(|| Box::new(FloatIntConv)), false);
        self.add_soft("s_s", String, String, factory(|| Box::new(StringConv)), false);
        self.add_soft("b_b", Bitfield, Bitfield, factory(|| Box::new(BitfieldConv)), false);
        self.add_soft("ibo", Integer, Integer, factory(|| Box::new(OrderConv)), false);
        self.add_soft("ibo(opt)", Integer, Integer, factory(|| Box::new(OrderOptConv)), false);
        self.add_soft("fbo", Float, Float, factory(|| Box::new(OrderConv)), false);
        self.add_soft("fbo(opt)", Float, Float, factory(|| Box::new(OrderOptConv)), false);
        self.add_soft("enum", Enum, Enum, factory(|| Box::new(EnumConv::default())), false);
        self.add_soft("enum_i", Enum, Integer, factory(|| Box::new(EnumNumericConv)), false);
        self.add_soft("enum_f", Enum, Float, factory(|| Box::new(EnumNumericConv)), false);
        self.add_soft("array", Array, Array, factory(|| Box::new(ArrayConv::default())), false);
        self.add_soft("rbo(opt)", Reference, Reference, factory(|| Box::new(OrderOptConv)), false);
        self.add_soft("ref", Reference, Reference, factory(|| Box::new(ReferenceConv)), false);

        // legacy references keep their encoding between memory and disk
        for (name, mem) in [("objref", Datatype::object_ref()), ("regref", Datatype::region_ref())] {
            let disk = mem.clone().with_location(RefLocation::Disk);
            self.add_hard(name, &mem, &disk, factory(|| Box::new(NoopConv)), false);
            self.add_hard(name, &disk, &mem, factory(|| Box::new(NoopConv)), false);
        }
    }

    fn add_hard(&self, name: &str, src: &Datatype, dst: &Datatype, factory: ConverterFactory, is_app: bool) {
        self.hard.borrow_mut().push(HardEntry {
            name: name.to_string(),
            src: src.clone(),
            dst: dst.clone(),
            factory,
            is_app,
        });
    }

    fn hard_entry(&self, src: &Datatype, dst: &Datatype) -> Option<HardEntry> {
        self.hard
            .borrow()
            .iter()
            .rev()
            .find(|e| e.src == *src && e.dst == *dst)
            .cloned()
    }

    fn add_soft(
        &self,
        name: &str,
        src: TypeClass,
        dst: TypeClass,
        factory: ConverterFactory,
        is_app: bool,
    ) {
        self.soft.borrow_mut().push(SoftEntry {
            name: name.to_string(),
            src,
            dst,
            factory,
            is_app,
        });
    }

    /// Register an application soft function for a class pair.
    ///
    /// Cached soft paths for the same class pair are released so the next
    /// lookup offers them to the new function first.
    pub fn register_soft<F>(&self, name: &str, src: TypeClass, dst: TypeClass, factory: F)
    where
        F: Fn() -> Box<dyn Converter> + 'static,
    {
        self.add_soft(name, src, dst, self::factory(factory), true);
        let released = self.remove_paths(|e| !e.is_hard && e.src.class() == src && e.dst.class() == dst);
        debug!("registered soft conversion `{name}` ({src} -> {dst}), released {released} cached paths");
    }

    /// Register an application hard function for one exact pair.
    ///
    /// The path is built immediately, replacing any cached path for the
    /// pair. Initialization failure is an error.
    pub fn register_hard<F>(&self, name: &str, src: &Datatype, dst: &Datatype, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Converter> + 'static,
    {
        let factory = self::factory(factory);
        let mut conv = factory();
        let need = conv.init(src, dst, &InitCtx { registry: self, handler: None })?;
        self.add_hard(name, src, dst, factory, true);
        self.remove_paths(|e| e.src == *src && e.dst == *dst);
        self.insert(name, src, dst, conv, need, true, true);
        debug!("registered hard conversion `{name}` ({} -> {})", src.class(), dst.class());
        Ok(())
    }

    /// Remove conversion functions and the paths they created.
    ///
    /// `None` filters match anything. Soft functions match on the class of
    /// `src`/`dst`, hard functions and paths on exact equality.
    pub fn unregister(
        &self,
        pers: Persistence,
        name: Option<&str>,
        src: Option<&Datatype>,
        dst: Option<&Datatype>,
    ) {
        let name_ok = |n: &str| name.map_or(true, |want| want == n);
        if pers.covers_soft() {
            self.soft.borrow_mut().retain(|e| {
                !(name_ok(&e.name)
                    && src.map_or(true, |t| t.class() == e.src)
                    && dst.map_or(true, |t| t.class() == e.dst))
            });
        }
        if pers.covers_hard() {
            self.hard.borrow_mut().retain(|e| {
                !(name_ok(&e.name)
                    && src.map_or(true, |t| *t == e.src)
                    && dst.map_or(true, |t| *t == e.dst))
            });
        }
        let released = self.remove_paths(|e| {
            let pers_ok = match pers {
                Persistence::Soft => !e.is_hard,
                Persistence::Hard => e.is_hard,
                Persistence::All => true,
            };
            pers_ok
                && name_ok(&e.name)
                && src.map_or(true, |t| *t == e.src)
                && dst.map_or(true, |t| *t == e.dst)
        });
        debug!("unregistered conversions matching {name:?}, released {released} paths");
    }

    fn remove_paths<P>(&self, pred: P) -> usize
    where
        P: Fn(&TableEntry) -> bool,
    {
        let removed: Vec<TableEntry> = {
            let mut table = self.paths.borrow_mut();
            let (gone, kept): (Vec<_>, Vec<_>) = table.drain(..).partition(|e| pred(e));
            *table = kept;
            gone
        };
        for entry in &removed {
            release(&entry.path);
        }
        removed.len()
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &self,
        name: &str,
        src: &Datatype,
        dst: &Datatype,
        conv: Box<dyn Converter>,
        need: BackgroundNeed,
        is_hard: bool,
        is_app: bool,
    ) -> PathRef {
        let path = ConversionPath::new(name, Some(src.clone()), Some(dst.clone()), conv, need)
            .hard(is_hard)
            .app(is_app);
        let path = Rc::new(RefCell::new(path));
        self.paths.borrow_mut().push(TableEntry {
            name: name.to_string(),
            src: src.clone(),
            dst: dst.clone(),
            is_hard,
            path: Rc::clone(&path),
        });
        debug!("created conversion path `{name}` ({} -> {})", src.class(), dst.class());
        path
    }

    /// Cached path for the pair. Hard paths win; a cached soft path is
    /// only returned when no hard function covers the pair, unless
    /// `soft_only` is set.
    fn lookup(&self, src: &Datatype, dst: &Datatype, soft_only: bool) -> Option<PathRef> {
        let table = self.paths.borrow();
        let matching = || table.iter().filter(move |e| e.src == *src && e.dst == *dst);
        let entry = if soft_only {
            matching().find(|e| !e.is_hard)
        } else {
            matching().find(|e| e.is_hard).or_else(|| {
                if self.hard_entry(src, dst).is_some() {
                    None
                } else {
                    matching().next()
                }
            })
        };
        entry.map(|e| Rc::clone(&e.path))
    }

    /// Find or create the path from `src` to `dst`.
    pub fn find(&self, src: &Datatype, dst: &Datatype) -> Result<PathRef> {
        self.find_with_handler(src, dst, None)
    }

    /// Find or create a path, giving initialization access to the transfer
    /// properties' exception handler.
    pub fn find_with(&self, src: &Datatype, dst: &Datatype, props: &TransferProps) -> Result<PathRef> {
        self.find_path(src, dst, props.exception_handler(), props.force_soft)
    }

    pub(crate) fn find_with_handler(
        &self,
        src: &Datatype,
        dst: &Datatype,
        handler: Option<&dyn ExceptionHandler>,
    ) -> Result<PathRef> {
        self.find_path(src, dst, handler, false)
    }

    fn find_path(
        &self,
        src: &Datatype,
        dst: &Datatype,
        handler: Option<&dyn ExceptionHandler>,
        force_soft: bool,
    ) -> Result<PathRef> {
        if !src.force_conversion() && !dst.force_conversion() && src == dst {
            return Ok(Rc::clone(&self.noop));
        }
        if let Some(path) = self.lookup(src, dst, force_soft) {
            return Ok(path);
        }

        let ctx = InitCtx {
            registry: self,
            handler,
        };
        let hard = if force_soft { None } else { self.hard_entry(src, dst) };
        if let Some(entry) = hard {
            let mut conv = (entry.factory)();
            let need = conv.init(src, dst, &ctx)?;
            return Ok(self.insert(&entry.name, src, dst, conv, need, true, entry.is_app));
        }

        let candidates: Vec<SoftEntry> = self
            .soft
            .borrow()
            .iter()
            .rev()
            .filter(|e| e.src == src.class() && e.dst == dst.class())
            .cloned()
            .collect();
        for entry in candidates {
            let mut conv = (entry.factory)();
            match conv.init(src, dst, &ctx) {
                Ok(need) => {
                    // a nested initialization may have built the same pair
                    if let Some(path) = self.lookup(src, dst, true) {
                        return Ok(path);
                    }
                    return Ok(self.insert(&entry.name, src, dst, conv, need, false, entry.is_app));
                }
                Err(e) if e.is_capability_mismatch() => trace!(
                    "soft conversion `{}` declined {} -> {}: {e}",
                    entry.name,
                    src.class(),
                    dst.class()
                ),
                Err(e) => debug!(
                    "soft conversion `{}` failed to initialize {} -> {}: {e}",
                    entry.name,
                    src.class(),
                    dst.class()
                ),
            }
        }
        Err(ConvError::NoConversionPath {
            src: src.class(),
            dst: dst.class(),
        })
    }

    /// Whether converting from `src` to `dst` leaves data untouched.
    pub fn is_noop(&self, src: &Datatype, dst: &Datatype) -> Result<bool> {
        let path = self.find(src, dst)?;
        let noop = path.borrow().is_noop();
        Ok(noop)
    }

    /// Background requirement of the path from `src` to `dst`.
    pub fn need_background(&self, src: &Datatype, dst: &Datatype) -> Result<BackgroundNeed> {
        let path = self.find(src, dst)?;
        let need = path.borrow().need_background();
        Ok(need)
    }

    /// Convert `nelmts` packed elements in place.
    pub fn convert(
        &self,
        src: &Datatype,
        dst: &Datatype,
        nelmts: usize,
        buf: &mut [u8],
        bkg: Option<&mut [u8]>,
        props: &TransferProps,
    ) -> Result<()> {
        let args = ConvArgs {
            nelmts,
            buf_stride: 0,
            bkg_stride: 0,
            buf,
            bkg,
        };
        self.convert_strided(src, dst, args, props)
    }

    /// Convert with explicit strides.
    pub fn convert_strided(
        &self,
        src: &Datatype,
        dst: &Datatype,
        args: ConvArgs<'_>,
        props: &TransferProps,
    ) -> Result<()> {
        let handler = props.exception_handler();
        let path = self.find_path(src, dst, handler, props.force_soft)?;
        let ctx = ConvCtx {
            registry: self,
            handler,
            recursive: false,
        };
        self.convert_with_ctx(&path, src, dst, &ctx, args)
    }

    /// Run `path` under an existing context. Converters use this for
    /// nested conversions, passing `ctx.nested()`.
    pub fn convert_with_ctx(
        &self,
        path: &PathRef,
        src: &Datatype,
        dst: &Datatype,
        ctx: &ConvCtx<'_>,
        args: ConvArgs<'_>,
    ) -> Result<()> {
        let (ssize, dsize) = (src.size(), dst.size());
        let needed = Traversal::plan_direction(ssize, dsize, args.buf_stride, args.nelmts)
            .required_len(ssize, dsize);
        ensure_len(args.buf, needed)?;
        let mut p = path
            .try_borrow_mut()
            .map_err(|_| ConvError::PathBusy(format!("{} -> {}", src.class(), dst.class())))?;
        p.run(src, dst, ctx, args)
    }

    /// Install the operations for one reference encoding.
    pub fn register_ref_class(&self, ref_type: ReferenceType, location: RefLocation, class: Rc<dyn RefClass>) {
        self.ref_classes.borrow_mut().insert((ref_type, location), class);
    }

    /// Operations for the encoding of `dt`.
    pub fn ref_class(&self, dt: &Datatype) -> Result<Rc<dyn RefClass>> {
        let Datatype::Reference {
            ref_type, location, ..
        } = dt
        else {
            return Err(ConvError::BadType {
                expected: "reference",
                actual: dt.class(),
            });
        };
        self.ref_classes
            .borrow()
            .get(&(*ref_type, *location))
            .cloned()
            .ok_or_else(|| {
                ConvError::Reference(format!("no operations for {ref_type:?} references in {location:?}"))
            })
    }

    /// Number of cached paths, excluding the no-op path.
    pub fn path_count(&self) -> usize {
        self.paths.borrow().len()
    }

    /// Release every cached path.
    pub fn shutdown(&self) {
        let entries = std::mem::take(&mut *self.paths.borrow_mut());
        let n = entries.len();
        for entry in &entries {
            release(&entry.path);
        }
        if n > 0 {
            debug!("released {n} conversion paths");
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
        release(&self.noop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DatatypeByteOrder;
    use std::cell::Cell;

    struct Counting {
        inits: Rc<Cell<u32>>,
        frees: Rc<Cell<u32>>,
    }

    impl Converter for Counting {
        fn init(&mut self, _: &Datatype, _: &Datatype, _: &InitCtx<'_>) -> Result<BackgroundNeed> {
            self.inits.set(self.inits.get() + 1);
            Ok(BackgroundNeed::No)
        }

        fn convert(&mut self, _: &Datatype, _: &Datatype, _: &ConvCtx<'_>, args: ConvArgs<'_>) -> Result<()> {
            args.buf.fill(0x42);
            Ok(())
        }

        fn free(&mut self) -> Result<()> {
            self.frees.set(self.frees.get() + 1);
            Ok(())
        }
    }

    struct Declining;

    impl Converter for Declining {
        fn init(&mut self, _: &Datatype, _: &Datatype, _: &InitCtx<'_>) -> Result<BackgroundNeed> {
            Err(ConvError::Unsupported("never".into()))
        }

        fn convert(&mut self, _: &Datatype, _: &Datatype, _: &ConvCtx<'_>, _: ConvArgs<'_>) -> Result<()> {
            unreachable!()
        }
    }

    #[test]
    fn equal_types_use_noop() {
        let r = Registry::new();
        let t = Datatype::native_i32();
        let p = r.find(&t, &t).unwrap();
        assert!(p.borrow().is_noop());
        assert_eq!(p.borrow().name(), "no-op");
        assert_eq!(r.path_count(), 0);
    }

    #[test]
    fn paths_are_cached() {
        let r = Registry::new();
        let a = Datatype::std_i32_be();
        let b = Datatype::std_i32_le();
        let p1 = r.find(&a, &b).unwrap();
        let p2 = r.find(&a, &b).unwrap();
        assert!(Rc::ptr_eq(&p1, &p2));
        assert_eq!(p1.borrow().name(), "ibo(opt)");
        assert_eq!(r.path_count(), 1);
    }

    #[test]
    fn newest_soft_function_wins_and_declines_fall_through() {
        let r = Registry::new();
        let inits = Rc::new(Cell::new(0));
        let frees = Rc::new(Cell::new(0));
        let (i, f) = (inits.clone(), frees.clone());
        r.register_soft("mine", TypeClass::Integer, TypeClass::Integer, move || {
            Box::new(Counting {
                inits: i.clone(),
                frees: f.clone(),
            })
        });
        r.register_soft("declines", TypeClass::Integer, TypeClass::Integer, || Box::new(Declining));
        let src = Datatype::native_i16();
        let dst = Datatype::native_i64();
        let p = r.find(&src, &dst).unwrap();
        assert_eq!(p.borrow().name(), "mine");
        assert!(p.borrow().is_app());
        assert_eq!(inits.get(), 1);

        let mut buf = [0u8; 16];
        r.convert(&src, &dst, 2, &mut buf, None, &TransferProps::new()).unwrap();
        assert_eq!(buf, [0x42; 16]);

        r.unregister(Persistence::Soft, Some("mine"), None, None);
        assert_eq!(frees.get(), 1);
        assert_eq!(r.find(&src, &dst).unwrap().borrow().name(), "i_i");
    }

    #[test]
    fn registering_soft_releases_cached_paths() {
        let r = Registry::new();
        let a = Datatype::std_i32_be();
        let b = Datatype::std_i32_le();
        r.find(&a, &b).unwrap();
        assert_eq!(r.path_count(), 1);
        r.register_soft("declines", TypeClass::Integer, TypeClass::Integer, || Box::new(Declining));
        assert_eq!(r.path_count(), 0);
        assert_eq!(r.find(&a, &b).unwrap().borrow().name(), "ibo(opt)");
    }

    #[test]
    fn hard_function_binds_exact_pair() {
        let r = Registry::new();
        let inits = Rc::new(Cell::new(0));
        let frees = Rc::new(Cell::new(0));
        let (i, f) = (inits.clone(), frees.clone());
        let src = Datatype::native_u8();
        let dst = Datatype::native_u16();
        r.register_hard("u8_u16", &src, &dst, move || {
            Box::new(Counting {
                inits: i.clone(),
                frees: f.clone(),
            })
        })
        .unwrap();
        let p = r.find(&src, &dst).unwrap();
        assert!(p.borrow().is_hard());
        assert_eq!(p.borrow().name(), "u8_u16");
        assert_eq!(r.find(&Datatype::native_u8(), &Datatype::native_u32()).unwrap().borrow().name(), "i_i");

        r.unregister(Persistence::Hard, None, Some(&src), Some(&dst));
        assert_eq!(frees.get(), 1);
        assert_eq!(r.find(&src, &dst).unwrap().borrow().name(), "i_i");
    }

    #[test]
    fn force_soft_skips_hard_functions() {
        let r = Registry::new();
        let src = Datatype::native_u8();
        let dst = Datatype::native_u16();
        r.register_hard("u8_u16", &src, &dst, || {
            Box::new(Counting {
                inits: Rc::new(Cell::new(0)),
                frees: Rc::new(Cell::new(0)),
            })
        })
        .unwrap();
        let soft = TransferProps::new().force_soft(true);
        let p = r.find_with(&src, &dst, &soft).unwrap();
        assert_eq!(p.borrow().name(), "i_i");
        assert!(!p.borrow().is_hard());
        assert_eq!(r.find(&src, &dst).unwrap().borrow().name(), "u8_u16");
        assert_eq!(r.find_with(&src, &dst, &soft).unwrap().borrow().name(), "i_i");

        let mut buf = [7u8, 0];
        r.convert(&src, &dst, 1, &mut buf, None, &soft).unwrap();
        assert_eq!(u16::from_ne_bytes(buf), 7);
    }

    #[test]
    fn legacy_references_relocate_without_conversion() {
        let r = Registry::new();
        let mem = Datatype::object_ref();
        let disk = Datatype::object_ref().with_location(RefLocation::Disk);
        let p = r.find(&mem, &disk).unwrap();
        assert_eq!(p.borrow().name(), "objref");
        assert!(p.borrow().is_hard());
        let soft = TransferProps::new().force_soft(true);
        assert_eq!(r.find_with(&disk, &mem, &soft).unwrap().borrow().name(), "rbo(opt)");
        assert!(r.is_noop(&mem, &mem).unwrap());
        assert!(!r.is_noop(&Datatype::std_i32_be(), &Datatype::std_i32_le()).unwrap());
    }

    #[test]
    fn hard_init_failure_is_an_error() {
        let r = Registry::new();
        let err = r
            .register_hard("bad", &Datatype::native_u8(), &Datatype::native_u16(), || Box::new(Declining))
            .unwrap_err();
        assert!(matches!(err, ConvError::Unsupported(_)));
    }

    #[test]
    fn empty_registry_has_no_paths() {
        let r = Registry::empty();
        let err = r
            .find(&Datatype::std_i32_be(), &Datatype::std_i32_le())
            .unwrap_err();
        assert_eq!(
            err,
            ConvError::NoConversionPath {
                src: TypeClass::Integer,
                dst: TypeClass::Integer
            }
        );
        let t = Datatype::bitfield(2, DatatypeByteOrder::LittleEndian);
        assert!(r.find(&t, &t).unwrap().borrow().is_noop());
    }

    #[test]
    fn forced_types_never_take_noop() {
        let r = Registry::new();
        let t = Datatype::opaque_ref();
        let p = r.find(&t, &t).unwrap();
        assert!(!p.borrow().is_noop());
        assert_eq!(p.borrow().name(), "ref");
    }

    #[test]
    fn short_buffer_is_rejected() {
        let r = Registry::new();
        let mut buf = [0u8; 7];
        let err = r
            .convert(
                &Datatype::std_i32_be(),
                &Datatype::std_i32_le(),
                2,
                &mut buf,
                None,
                &TransferProps::new(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ConvError::BufferTooSmall {
                needed: 8,
                available: 7
            }
        );
    }

    #[test]
    fn huge_element_count_is_rejected() {
        let r = Registry::new();
        let props = TransferProps::new();
        let pairs = [
            (Datatype::std_i32_be(), Datatype::std_i32_le()),
            (Datatype::native_i16(), Datatype::native_i32()),
            (Datatype::native_i32(), Datatype::native_f64()),
            (Datatype::region_ref(), Datatype::opaque_ref()),
            (
                Datatype::array(Datatype::std_i32_be(), &[1]),
                Datatype::array(Datatype::std_i32_le(), &[1]),
            ),
        ];
        for (src, dst) in &pairs {
            let mut buf = [0u8; 4];
            let err = r.convert(src, dst, usize::MAX, &mut buf, None, &props).unwrap_err();
            assert_eq!(
                err,
                ConvError::BufferTooSmall {
                    needed: usize::MAX,
                    available: 4
                },
                "{src:?} -> {dst:?}"
            );
        }
    }

    #[test]
    fn shutdown_frees_paths() {
        let frees = Rc::new(Cell::new(0));
        {
            let r = Registry::empty();
            let f = frees.clone();
            r.register_soft("mine", TypeClass::Integer, TypeClass::Integer, move || {
                Box::new(Counting {
                    inits: Rc::new(Cell::new(0)),
                    frees: f.clone(),
                })
            });
            r.find(&Datatype::native_i8(), &Datatype::native_i16()).unwrap();
            r.find(&Datatype::native_i8(), &Datatype::native_i32()).unwrap();
        }
        assert_eq!(frees.get(), 2);
    }

    #[test]
    fn ref_class_lookup() {
        let r = Registry::new();
        assert!(r.ref_class(&Datatype::object_ref()).is_ok());
        assert!(r.ref_class(&Datatype::opaque_ref_disk(32)).is_ok());
        assert!(matches!(
            r.ref_class(&Datatype::native_u8()),
            Err(ConvError::BadType { .. })
        ));
    }
}
