//! Pi-cam-registry binary: load the module, list cameras, log hotplug events.

use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use pi_cam_registry::{CameraId, CameraModule, HotplugStatus, RegistryConfig, MAX_CAMERA_NUM};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        error!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let seconds = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u64>()
            .map_err(|err| format!("invalid duration {arg:?}: {err}"))?,
        None => 30,
    };

    let module = CameraModule::load(RegistryConfig::from_env());
    let dispatch = module.dispatch();
    if !module.registry().is_ready() {
        return Err("camera registry failed to initialize".to_owned());
    }

    dispatch.set_callbacks(|id: CameraId, status: HotplugStatus| {
        info!("camera {id} is now {status:?}");
    });

    info!("{} cameras present", dispatch.get_number_of_cameras());
    for id in (0_i64..).take(MAX_CAMERA_NUM) {
        match dispatch.get_camera_info(id) {
            Ok(camera) => info!(
                "camera {id}: {} ({}), facing {:?}, format {:?}",
                camera.capabilities.card,
                camera.capabilities.driver,
                camera.facing,
                camera.format
            ),
            Err(err) => warn!("camera {id}: {err}"),
        }
    }

    info!("watching hotplug events for {seconds}s");
    thread::sleep(Duration::from_secs(seconds));

    module.unload();
    Ok(())
}
