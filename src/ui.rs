//! Interface de terminal do qr-attend — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`AttemptProgress`] acompanha visualmente
//! a Fase 2 de uma tentativa de presença no terminal.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::attempt::{AttemptStatus, AttendanceAttempt};
use crate::orchestrator::Phase1Response;
use crate::store::StoredRecord;

/// Indicador visual de progresso para a Fase 2 de uma tentativa.
///
/// Exibe um spinner animado enquanto o navegador trabalha e mensagens
/// coloridas para sucesso (verde) e falha (vermelho).
pub struct AttemptProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl AttemptProgress {
    /// Imprime a resposta da Fase 1 e inicia o spinner.
    pub fn start(response: &Phase1Response) -> Self {
        let cyan = Style::new().cyan().bold();
        println!("{}", cyan.apply_to("─── QR code pronto ───"));
        println!("  attempt:   {}", response.attempt_id);
        println!("  session:   {}", response.kind);
        println!("  original:  {}", response.original_link);
        println!("  converted: {}", response.converted_link);
        println!("  image:     {}", response.image_path.display());
        println!();
        Self::spinner()
    }

    /// Inicia o spinner para uma tentativa sem Fase 1 (link já convertido).
    pub fn resume(attempt: &AttendanceAttempt) -> Self {
        let cyan = Style::new().cyan().bold();
        println!("{}", cyan.apply_to("─── Marcando presença ───"));
        println!("  attempt:   {}", attempt.id);
        println!("  session:   {}", attempt.kind);
        println!("  link:      {}", attempt.converted_link);
        println!();
        Self::spinner()
    }

    fn spinner() -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Marking attendance on the portal...");
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza o spinner e exibe o resultado final da tentativa.
    pub fn complete(&self, attempt: &AttendanceAttempt) {
        self.pb.finish_and_clear();
        match attempt.status {
            AttemptStatus::Success => {
                println!("  {} {}", self.green.apply_to("✓"), attempt.message);
            }
            AttemptStatus::Failed => {
                println!("  {} {}", self.red.apply_to("✗"), attempt.message);
            }
            AttemptStatus::Pending => {
                println!("  {} attempt still pending", self.yellow.apply_to("…"));
            }
        }
        if let Some(path) = &attempt.screenshot_path {
            println!("  screenshot: {}", path.display());
        }
    }

    /// Imprime o registro de auditoria formatado em JSON com estilo colorido.
    pub fn print_audit(&self, attempt: &AttendanceAttempt) {
        let status_style = match attempt.status {
            AttemptStatus::Success => &self.green,
            AttemptStatus::Failed => &self.red,
            AttemptStatus::Pending => &self.yellow,
        };
        println!();
        println!("{}", status_style.apply_to("─── Audit Record ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(attempt).unwrap_or_default()
        );
    }
}

/// Lista registros do histórico, um por linha.
pub fn print_records(records: &[StoredRecord]) {
    if records.is_empty() {
        println!("{}", Style::new().dim().apply_to("No records found"));
        return;
    }
    let green = Style::new().green();
    let red = Style::new().red();
    for record in records {
        let f = &record.fields;
        let status = match f.status {
            crate::store::RecordStatus::Success => green.apply_to(f.status.to_string()),
            _ => red.apply_to(f.status.to_string()),
        };
        let link = f
            .converted_link
            .as_deref()
            .or(f.evening_link.as_deref())
            .unwrap_or(&f.original_link);
        println!("{}  {:<8} {}  {}", f.timestamp, status, f.module, link);
    }
}
