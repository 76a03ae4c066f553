use strata_ir::KernelBuilder;

use super::STRUCT_FOR_TEMPLATE;
use crate::codegen::tests::dense_i32_tree;
use crate::codegen::KernelCodegen;
use crate::config::CompileConfig;

#[test]
fn entries_are_per_task_copies_with_resized_buffers() {
    let (tree, _) = dense_i32_tree();
    let ir = KernelBuilder::new().finish();
    let config = CompileConfig::default();
    let mut cg = KernelCodegen::new("k", &ir, &tree, &config);

    let wide = cg.gpu_struct_for_entry("wide", 24).unwrap();
    let empty = cg.gpu_struct_for_entry("empty", 0).unwrap();
    assert_ne!(wide, empty);

    let module = cg.builder.module();
    let wide_text = module.print_function(wide);
    assert!(wide_text.starts_with("define void @wide_parallel_struct_for("), "{wide_text}");
    assert!(wide_text.contains("alloca i8 x 24, align 8"), "{wide_text}");
    let empty_text = module.print_function(empty);
    assert!(empty_text.contains("alloca i8 x 1, align 8"), "{empty_text}");
    assert!(empty_text.contains("@gpu_struct_for_parts("), "{empty_text}");

    let templates = module
        .print()
        .matches(&format!("@{STRUCT_FOR_TEMPLATE}("))
        .count();
    assert_eq!(templates, 1);
}

#[test]
fn the_template_is_pruned_with_the_module() {
    let (tree, _) = dense_i32_tree();
    let ir = KernelBuilder::new().finish();
    let config = CompileConfig::default();
    let mut cg = KernelCodegen::new("k", &ir, &tree, &config);
    let entry = cg.gpu_struct_for_entry("only", 8).unwrap();
    let (builder, _) = cg.finish();

    let mut module = builder.into_module();
    assert_eq!(module.retain_reachable(&[entry]), 1);
    let text = module.print();
    assert!(!text.contains(&format!("@{STRUCT_FOR_TEMPLATE}(")), "{text}");
    assert!(text.contains("@only_parallel_struct_for("), "{text}");
    module.verify().unwrap();
}
