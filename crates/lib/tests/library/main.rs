mod common;

mod build_tests;
mod imports_tests;
mod make_tests;
mod predict_tests;
