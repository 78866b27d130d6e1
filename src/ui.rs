//! Settings panel

use crate::settings::*;

/// Draw the shadow settings window. Returns true if any value changed.
pub fn settings_window(ctx: &egui::Context, settings: &mut ShadowSettings) -> bool {
    let before = settings.clone();

    egui::Window::new("Screen-Space Shadows")
        .default_pos([10.0, 10.0])
        .resizable(false)
        .show(ctx, |ui| {
            ui.heading("Shadows");
            ui.separator();

            ui.checkbox(&mut settings.use_screen_space_radius, "Screen-space radius");
            if settings.use_screen_space_radius {
                ui.add(
                    egui::Slider::new(&mut settings.shadow_radius_pixels, SHADOW_RADIUS_PIXELS_RANGE)
                        .text("Radius (pixels)"),
                );
            } else {
                ui.add(
                    egui::Slider::new(&mut settings.shadow_radius, SHADOW_RADIUS_RANGE)
                        .logarithmic(true)
                        .text("Radius"),
                );
            }
            ui.add(egui::Slider::new(&mut settings.shadow_steps, SHADOW_STEPS_RANGE).text("Steps"));

            egui::ComboBox::from_label("Contact shadows")
                .selected_text(settings.contact_shadows_mode.label())
                .show_ui(ui, |ui| {
                    for mode in ContactShadowsMode::ALL {
                        ui.selectable_value(&mut settings.contact_shadows_mode, mode, mode.label());
                    }
                });

            ui.checkbox(&mut settings.use_noise_offset, "Noise offset");
            ui.add_enabled(
                settings.use_noise_offset,
                egui::Checkbox::new(&mut settings.dynamic_noise, "Dynamic noise"),
            );
            ui.checkbox(&mut settings.display_shadows_only, "Display shadows only");
            ui.checkbox(&mut settings.move_light, "Move light");

            ui.add_space(10.0);
            ui.heading("TXAA");
            ui.separator();

            ui.checkbox(&mut settings.enable_txaa, "Enable");
            ui.add_enabled_ui(settings.enable_txaa, |ui| {
                ui.add(egui::Slider::new(&mut settings.feedback_min, FEEDBACK_RANGE).text("Feedback min"));
                ui.add(egui::Slider::new(&mut settings.feedback_max, FEEDBACK_RANGE).text("Feedback max"));
                ui.checkbox(&mut settings.apply_mitchell_filter, "Mitchell filter");
            });

            ui.add_space(10.0);
            ui.heading("Debug");
            ui.separator();
            ui.checkbox(&mut settings.debug_slow_frame, "Slow frame");
        });

    *settings != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untouched_window_reports_no_change() {
        let ctx = egui::Context::default();
        let mut settings = ShadowSettings::default();
        let mut changed = true;
        let _ = ctx.run(egui::RawInput::default(), |ctx| {
            changed = settings_window(ctx, &mut settings);
        });
        assert!(!changed);
        assert_eq!(settings, ShadowSettings::default());
    }
}
