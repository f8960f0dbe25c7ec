//! GLSL sources for every pass, compiled through naga's GLSL frontend.
//!
//! Uniform block layouts must match the `#[repr(C)]` structs in `uniforms.rs`.

use std::borrow::Cow;

use wgpu::naga::ShaderStage;

pub(crate) fn compile(
    device: &wgpu::Device,
    label: &str,
    source: &'static str,
    stage: ShaderStage,
) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(source),
            stage,
            defines: &[],
        },
    })
}

/// Shader modules shared by all pipelines.
pub(crate) struct ShaderModules {
    pub fullscreen: wgpu::ShaderModule,
    pub scene_vertex: wgpu::ShaderModule,
    pub scene_fragment: wgpu::ShaderModule,
    pub tone_map: wgpu::ShaderModule,
    pub encode: wgpu::ShaderModule,
    pub luminance: wgpu::ShaderModule,
    pub adapt: wgpu::ShaderModule,
    pub sample: wgpu::ShaderModule,
    pub blit: wgpu::ShaderModule,
}

impl ShaderModules {
    pub fn new(device: &wgpu::Device) -> Self {
        let fragment = |label, source| compile(device, label, source, ShaderStage::Fragment);
        Self {
            fullscreen: compile(device, "fullscreen triangle vertex", FULLSCREEN_VERTEX, ShaderStage::Vertex),
            scene_vertex: compile(device, "scene vertex", SCENE_VERTEX, ShaderStage::Vertex),
            scene_fragment: fragment("scene fragment", SCENE_FRAGMENT),
            tone_map: fragment("tone map fragment", TONE_MAP_FRAGMENT),
            encode: fragment("output encoding fragment", ENCODE_FRAGMENT),
            luminance: fragment("luminance measure fragment", LUMINANCE_FRAGMENT),
            adapt: fragment("luminance adapt fragment", ADAPT_FRAGMENT),
            sample: fragment("luminance sample fragment", SAMPLE_FRAGMENT),
            blit: fragment("blit fragment", BLIT_FRAGMENT),
        }
    }
}

/// Minimal full-screen triangle vertex shader.
pub(crate) const FULLSCREEN_VERTEX: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    uint vertex_index = uint(gl_VertexIndex);
    vec2 pos = positions[vertex_index];
    v_uv = vec2(pos.x * 0.5 + 0.5, 0.5 - pos.y * 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

pub(crate) const SCENE_VERTEX: &str = r"#version 450
layout(location = 0) in vec3 a_position;
layout(location = 1) in vec3 a_normal;

layout(location = 0) out vec3 v_world;
layout(location = 1) out vec3 v_normal;

layout(std140, set = 0, binding = 0) uniform FrameUniforms {
    mat4 view_proj;
    vec4 camera_position;
    vec4 ambient;
    vec4 tone;
    vec4 light_position[8];
    vec4 light_color[8];
} frame;

layout(std140, set = 1, binding = 0) uniform NodeUniforms {
    mat4 model;
    mat4 normal_matrix;
    vec4 base_color;
    vec4 emissive;
} node;

void main() {
    vec4 world = node.model * vec4(a_position, 1.0);
    v_world = world.xyz;
    v_normal = normalize((node.normal_matrix * vec4(a_normal, 0.0)).xyz);
    gl_Position = frame.view_proj * world;
}
";

/// Lambert plus emissive with inverse-square point lights. `tone.y > 0.5`
/// selects inline linear tone mapping (`tone.x` exposure, `tone.z` exponent).
pub(crate) const SCENE_FRAGMENT: &str = r"#version 450
layout(location = 0) in vec3 v_world;
layout(location = 1) in vec3 v_normal;
layout(location = 0) out vec4 outColor;

layout(std140, set = 0, binding = 0) uniform FrameUniforms {
    mat4 view_proj;
    vec4 camera_position;
    vec4 ambient;
    vec4 tone;
    vec4 light_position[8];
    vec4 light_color[8];
} frame;

layout(std140, set = 1, binding = 0) uniform NodeUniforms {
    mat4 model;
    mat4 normal_matrix;
    vec4 base_color;
    vec4 emissive;
} node;

void main() {
    vec3 normal = normalize(v_normal);
    if (!gl_FrontFacing) {
        normal = -normal;
    }
    vec3 radiance = frame.ambient.rgb * node.base_color.rgb;
    int light_count = int(frame.ambient.w);
    for (int i = 0; i < light_count; ++i) {
        vec3 to_light = frame.light_position[i].xyz - v_world;
        float distance_sq = max(dot(to_light, to_light), 1e-4);
        float lambert = max(dot(normal, to_light * inversesqrt(distance_sq)), 0.0);
        float intensity = frame.light_position[i].w / distance_sq;
        radiance += node.base_color.rgb * frame.light_color[i].rgb * lambert * intensity;
    }
    radiance += node.emissive.rgb;

    if (frame.tone.y > 0.5) {
        vec3 mapped = clamp(radiance * frame.tone.x, 0.0, 1.0);
        outColor = vec4(pow(mapped, vec3(frame.tone.z)), 1.0);
    } else {
        outColor = vec4(radiance, 1.0);
    }
}
";

/// Shared by every fullscreen pass; matches `PostParams`.
macro_rules! post_header {
    () => {
        r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 outColor;

layout(set = 0, binding = 0) uniform texture2D source_texture;
layout(set = 0, binding = 1) uniform sampler source_sampler;
layout(std140, set = 0, binding = 2) uniform PostParams {
    vec4 region;
    vec4 source_size;
    float exposure;
    uint mode;
    float middle_grey;
    float gamma_exponent;
    float min_luminance;
    float max_luminance;
    float blend;
    float grid;
} params;
layout(set = 0, binding = 3) uniform texture2D secondary_texture;

#define SOURCE sampler2D(source_texture, source_sampler)
#define SECONDARY sampler2D(secondary_texture, source_sampler)

const vec3 LUMA = vec3(0.2126, 0.7152, 0.0722);
"
    };
}

/// Exposure scaling (`mode == 0`) or adaptive Reinhard against the adapted
/// luminance in the secondary texture (`mode == 1`).
pub(crate) const TONE_MAP_FRAGMENT: &str = concat!(
    post_header!(),
    r"
void main() {
    vec3 color = texelFetch(SOURCE, ivec2(gl_FragCoord.xy), 0).rgb;
    if (params.mode == 0u) {
        outColor = vec4(color * params.exposure, 1.0);
        return;
    }
    float adapted = texelFetch(SECONDARY, ivec2(0, 0), 0).r;
    float luminance = dot(color, LUMA);
    float scaled = luminance * params.middle_grey / max(params.min_luminance, adapted);
    float white_sq = params.max_luminance * params.max_luminance;
    float compressed = scaled * (1.0 + scaled / white_sq) / (1.0 + scaled);
    outColor = vec4(color * (compressed / max(luminance, 1e-4)), 1.0);
}
"
);

pub(crate) const ENCODE_FRAGMENT: &str = concat!(
    post_header!(),
    r"
void main() {
    vec3 color = clamp(texelFetch(SOURCE, ivec2(gl_FragCoord.xy), 0).rgb, 0.0, 1.0);
    outColor = vec4(pow(color, vec3(params.gamma_exponent)), 1.0);
}
"
);

/// Geometric mean luminance of `region` into a 1x1 target.
pub(crate) const LUMINANCE_FRAGMENT: &str = concat!(
    post_header!(),
    r"
void main() {
    const int TAPS = 16;
    float total = 0.0;
    for (int y = 0; y < TAPS; ++y) {
        for (int x = 0; x < TAPS; ++x) {
            vec2 cell = (vec2(x, y) + 0.5) / float(TAPS);
            vec2 uv = params.region.xy + cell * params.region.zw;
            float luminance = dot(textureLod(SOURCE, uv, 0.0).rgb, LUMA);
            total += log(max(luminance, 1e-4));
        }
    }
    float average = exp(total / float(TAPS * TAPS));
    outColor = vec4(clamp(average, params.min_luminance, params.max_luminance), 0.0, 0.0, 1.0);
}
"
);

/// Moves the adapted luminance (secondary) towards the measurement (source).
pub(crate) const ADAPT_FRAGMENT: &str = concat!(
    post_header!(),
    r"
void main() {
    float measured = texelFetch(SOURCE, ivec2(0, 0), 0).r;
    float adapted = texelFetch(SECONDARY, ivec2(0, 0), 0).r;
    outColor = vec4(mix(adapted, measured, params.blend), 0.0, 0.0, 1.0);
}
"
);

/// Averages a 4x4 grid of bilinear taps per output cell over the crop region.
pub(crate) const SAMPLE_FRAGMENT: &str = concat!(
    post_header!(),
    r"
void main() {
    const int TAPS = 4;
    vec2 cell = floor(gl_FragCoord.xy);
    vec2 cell_size = params.region.zw / params.grid;
    vec3 total = vec3(0.0);
    for (int y = 0; y < TAPS; ++y) {
        for (int x = 0; x < TAPS; ++x) {
            vec2 offset = (vec2(x, y) + 0.5) / float(TAPS);
            vec2 uv = params.region.xy + (cell + offset) * cell_size;
            total += textureLod(SOURCE, uv, 0.0).rgb;
        }
    }
    outColor = vec4(total / float(TAPS * TAPS), 1.0);
}
"
);

pub(crate) const BLIT_FRAGMENT: &str = concat!(
    post_header!(),
    r"
void main() {
    outColor = vec4(texelFetch(SOURCE, ivec2(gl_FragCoord.xy), 0).rgb, 1.0);
}
"
);
