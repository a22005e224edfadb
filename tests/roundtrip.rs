//! Image reading and writing.

mod common;

use common::{support_module, target_module, OLD_SYNTAX, OLD_SYNTAX_USES};
use dotpatch::prelude::*;

#[test]
fn test_image_write_is_stable() -> Result<()> {
    for module in [target_module()?, support_module()?] {
        let first = module.to_bytes()?;
        let reloaded = Module::from_bytes(&first)?;
        assert_eq!(reloaded.name(), module.name());
        assert_eq!(reloaded.to_bytes()?, first);
    }
    Ok(())
}

#[test]
fn test_reloaded_module_keeps_structure() -> Result<()> {
    let module = Module::from_bytes(&target_module()?.to_bytes()?)?;

    let path = TypePath::new("UnityEngine", "Object").nested("Nested").nested("Inner");
    let inner = resolve_type_path(&module, &path).ok_or(Error::Empty)?;
    assert_eq!(module.type_def_full_name(inner), "UnityEngine.Object+Nested+Inner");

    let object = module
        .top_level_type("UnityEngine", "Object")
        .ok_or(Error::Empty)?;
    let bar = find_method(
        &module,
        object,
        "Bar",
        "System.Void Bar(System.Int32, System.String)",
    )
    .ok_or(Error::Empty)?;
    let names: Vec<_> = module
        .method(bar)
        .ok_or(Error::Empty)?
        .params
        .iter()
        .filter_map(|id| module.param(*id))
        .map(|param| (param.sequence, param.name.as_str()))
        .collect();
    assert_eq!(names, vec![(1, "value"), (2, "label")]);

    let nested = module.nested_type(object, "Nested").ok_or(Error::Empty)?;
    let method = find_method_by_name(&module, nested, "GetTypeInformation").ok_or(Error::Empty)?;
    let plan = TypeReferenceRewriter::new(OLD_SYNTAX).plan(&module, method);
    assert_eq!(plan.len(), OLD_SYNTAX_USES);
    assert_eq!(plan.locals, vec![0, 2]);
    Ok(())
}

#[test]
fn test_partial_path_does_not_resolve() -> Result<()> {
    let module = target_module()?;

    let missing_middle = TypePath::new("UnityEngine", "Object")
        .nested("Missing")
        .nested("Inner");
    assert!(resolve_type_path(&module, &missing_middle).is_none());

    // nested types are not visible at the top level
    assert!(resolve_type_path(&module, &TypePath::new("", "Nested")).is_none());
    assert!(resolve_type_path(&module, &TypePath::new("UnityEngine", "Nested")).is_none());
    Ok(())
}

#[test]
fn test_truncated_images_fail_cleanly() -> Result<()> {
    let bytes = target_module()?.to_bytes()?;
    for length in 0..bytes.len() {
        assert!(
            Module::from_bytes(&bytes[..length]).is_err(),
            "prefix of {length} bytes parsed"
        );
    }
    Ok(())
}

#[test]
fn test_wrong_magic_is_rejected() -> Result<()> {
    let mut bytes = target_module()?.to_bytes()?;
    bytes[0] ^= 0xFF;
    assert!(Module::from_bytes(&bytes).is_err());
    Ok(())
}
