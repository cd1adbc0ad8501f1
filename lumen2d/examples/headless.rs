//! Headless demo: renders a few frames of a small lit scene and writes the
//! lighting buffer to `lighting.png`.

use anyhow::Result;
use lumen2d::{
    Box2, Eye, GpuCapabilities, Light, LightRenderer, LightingConfig, MapId, Occluder, SceneQuery,
    Transform2D, Vec2, Viewport,
};

struct DemoScene {
    occluders: Vec<(Transform2D, Occluder)>,
    lights: Vec<(Transform2D, Light)>,
}

impl SceneQuery for DemoScene {
    fn for_each_occluder_intersecting(
        &self,
        _map: MapId,
        bounds: Box2,
        visit: &mut dyn FnMut(&Transform2D, &Occluder),
    ) {
        for (transform, occluder) in &self.occluders {
            let world = Box2::new(
                transform.transform_point(occluder.bounds.min),
                transform.transform_point(occluder.bounds.max),
            );
            if world.intersects(&bounds) {
                visit(transform, occluder);
            }
        }
    }

    fn for_each_light_intersecting(
        &self,
        _map: MapId,
        bounds: Box2,
        visit: &mut dyn FnMut(&Transform2D, &Light) -> bool,
    ) {
        for (transform, light) in &self.lights {
            let world = Box2::centered(transform.position, Vec2::ONE * (light.radius * 2.0));
            if world.intersects(&bounds) && !visit(transform, light) {
                return;
            }
        }
    }
}

fn main() -> Result<()> {
    let instance = wgpu::Instance::default();
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("lumen2d-demo-device"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        experimental_features: Default::default(),
        memory_hints: Default::default(),
        trace: wgpu::Trace::Off,
    }))?;

    let caps = GpuCapabilities::detect(&adapter, &device);
    let mut renderer = LightRenderer::new(device, queue, caps, LightingConfig::default())?;

    // A wall east of the origin and two lights, one on each side of it.
    let scene = DemoScene {
        occluders: vec![(
            Transform2D::new(Vec2::new(3.0, 0.0), Vec2::ONE, 0.0),
            Occluder::new(Box2::new(Vec2::new(-0.5, -4.0), Vec2::new(0.5, 4.0))),
        )],
        lights: vec![
            (
                Transform2D::new(Vec2::new(-2.0, 0.0), Vec2::ONE, 0.0),
                Light {
                    radius: 8.0,
                    color: [1.0, 0.9, 0.7],
                    ..Default::default()
                },
            ),
            (
                Transform2D::new(Vec2::new(7.0, 2.0), Vec2::ONE, 0.0),
                Light {
                    radius: 5.0,
                    color: [0.4, 0.6, 1.0],
                    ..Default::default()
                },
            ),
        ],
    };

    let mut viewport = Viewport::new((640, 360));
    let mut eye = Eye::new(MapId(0), Vec2::ZERO);
    eye.measure_brightness = true;

    for _ in 0..3 {
        renderer.process_transfers();
        renderer.render_lights_and_fov(&mut viewport, &eye, &scene)?;
    }

    if let Some(target) = viewport.light_render_target() {
        renderer.request_screenshot(
            target,
            None,
            Box::new(|image| {
                if let Err(err) = image.save("lighting.png") {
                    eprintln!("failed to save screenshot: {err}");
                } else {
                    println!("wrote lighting.png");
                }
            }),
        )?;
    }

    // Let pending transfers land.
    for _ in 0..10 {
        renderer.process_transfers();
    }

    println!("scene brightness around the eye: {:.3}", eye.last_brightness());
    Ok(())
}
