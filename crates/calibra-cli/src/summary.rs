use calibra_core::calibrate::{AuxFrameConfig, CalibrationConfig};
use calibra_core::frame::CalibrationKind;
use calibra_core::pipeline::BatchReport;
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    enabled: Style,
    disabled: Style,
    path: Style,
    error: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            enabled: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
            error: Style::new().red().bold(),
        }
    }

    fn flag(&self, on: bool) -> console::StyledObject<&'static str> {
        if on {
            self.enabled.apply_to("yes")
        } else {
            self.disabled.apply_to("no")
        }
    }
}

pub fn print_run_summary(config: &CalibrationConfig, file_count: usize) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Calibra"));
    println!("  {}", s.title.apply_to("\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}"));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Files"),
        s.value.apply_to(file_count)
    );
    match config.output_dir {
        Some(ref dir) => println!(
            "  {:<14}{}",
            s.label.apply_to("Output"),
            s.path.apply_to(dir.display())
        ),
        None => println!(
            "  {:<14}{}",
            s.label.apply_to("Output"),
            s.disabled.apply_to("next to inputs")
        ),
    }
    println!(
        "  {:<14}{}",
        s.label.apply_to("Suffix"),
        s.value.apply_to(&config.output_suffix)
    );
    println!();

    println!("  {}", s.header.apply_to("Options"));
    println!("    {:<12}{}", s.label.apply_to("Scale dark"), s.flag(config.scale_dark));
    println!("    {:<12}{}", s.label.apply_to("Reload"), s.flag(config.reload));
    println!("    {:<12}{}", s.label.apply_to("Intermediate"), s.flag(config.intermediate));
    println!("    {:<12}{}", s.label.apply_to("Parallel"), s.flag(config.parallel));
    println!();

    println!("  {}", s.header.apply_to("Master Frames"));
    for kind in CalibrationKind::ALL {
        print_aux_line(&s, kind, config.aux(kind));
    }
    println!();
}

fn print_aux_line(s: &Styles, kind: CalibrationKind, aux: &AuxFrameConfig) {
    let label = s.label.apply_to(kind.history_label());
    match aux.file {
        Some(ref file) => println!("    {:<12}{}", label, s.path.apply_to(file.display())),
        None => println!(
            "    {:<12}{} {}",
            label,
            s.path.apply_to(aux.directory().join(aux.pattern(kind)).display()),
            s.label.apply_to(format!("[{}]", aux.fitkeys(kind).join(", ")))
        ),
    }
}

pub fn print_batch_report(report: &BatchReport) {
    let s = Styles::new();

    println!();
    println!(
        "  {:<14}{}",
        s.label.apply_to("Calibrated"),
        s.enabled.apply_to(report.succeeded())
    );
    if report.failed() > 0 {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Failed"),
            s.error.apply_to(report.failed())
        );
        for (input, error) in report.failures() {
            println!("    {}  {}", s.path.apply_to(input.display()), error);
        }
    }
    println!();
}
