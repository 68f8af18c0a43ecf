//! The `vadd` compute kernel.
//!
//! The WGSL source is a versioned constant. Bump [`KERNEL_VERSION`]
//! whenever the source or its argument layout changes.

/// Entry point looked up in the compiled program.
pub const KERNEL_NAME: &str = "vadd";

pub const KERNEL_VERSION: u32 = 1;

/// Invocations per workgroup; must match `@workgroup_size` in
/// [`VADD_SOURCE`].
pub const WORKGROUP_SIZE: u32 = 64;

/// Elementwise addition `c[i] = a[i] + b[i]` for `i < count`.
///
/// Argument layout (bind group 0):
///
/// | binding | argument | access            |
/// |---------|----------|-------------------|
/// | 0       | `a`      | read-only storage |
/// | 1       | `b`      | read-only storage |
/// | 2       | `c`      | storage           |
/// | 3       | `count`  | uniform `u32`     |
///
/// Workgroups may be laid out on a 2-D grid when the 1-D grid would
/// exceed the device limit, so the linear index is rebuilt from both
/// dimensions. Invocations past `count` do nothing.
pub const VADD_SOURCE: &str = r#"
struct Params {
    count: u32,
}

@group(0) @binding(0)
var<storage, read> a: array<f32>;
@group(0) @binding(1)
var<storage, read> b: array<f32>;
@group(0) @binding(2)
var<storage, read_write> c: array<f32>;
@group(0) @binding(3)
var<uniform> params: Params;

@compute @workgroup_size(64)
fn vadd(
    @builtin(global_invocation_id) global_id: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let i = global_id.x + global_id.y * groups.x * 64u;
    if (i < params.count) {
        c[i] = a[i] + b[i];
    }
}
"#;

/// Host rendition of the kernel over a launch of `global_size`
/// work-items, used for the CPU baseline and by the emulated device.
pub fn host_vadd(a: &[f32], b: &[f32], c: &mut [f32], count: usize, global_size: usize) {
    for i in 0..global_size {
        if i < count {
            c[i] = a[i] + b[i];
        }
    }
}
