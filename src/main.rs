// src/main.rs
use anyhow::{anyhow, bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use gas_lens::{
    AnalysisResult, AnalysisSummary, AnalyzerConfig, Difficulty, GasAnalyzer, Impact,
    OptimizationSuggestion, HEURISTIC_DISCLAIMER,
};
use std::fs;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("Gas Lens")
        .version("0.1.0")
        .author("Jeffrey Asante")
        .about("Estimate gas hot spots and suggest optimizations for smart-contract source")
        .arg(
            Arg::new("file")
                .help("Contract source file to analyze")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the report (or the rewritten source with --apply) to FILE"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("Output format: json, summary, detailed")
                .default_value("summary"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("JSON analyzer configuration (cost table, loop iterations, cache TTL)"),
        )
        .arg(
            Arg::new("apply")
                .long("apply")
                .value_name("ID")
                .help("Apply the suggestion with this id and report the new estimate"),
        )
        .get_matches();

    let file_path = matches
        .get_one::<String>("file")
        .ok_or_else(|| anyhow!("missing source file argument"))?;
    let format = matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("summary");

    let source = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read file '{}'", file_path))?;
    let config = match matches.get_one::<String>("config") {
        Some(path) => AnalyzerConfig::from_file(path)?,
        None => AnalyzerConfig::default(),
    };

    eprintln!("[INFO] Analyzing contract source: {}", file_path);
    eprintln!("[INFO] Cost model: {}", config.cost_model.version);

    let analyzer = GasAnalyzer::new(config);
    let analysis = analyzer.analyze(&source, file_path);

    if let Some(id) = matches.get_one::<String>("apply") {
        return apply_suggestion(&analyzer, &analysis, &source, file_path, id, &matches);
    }

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(analysis.as_ref())?;
            if let Some(output_file) = matches.get_one::<String>("output") {
                fs::write(output_file, &json)
                    .with_context(|| format!("Failed to write '{}'", output_file))?;
                eprintln!("[OK] Analysis saved to: {}", output_file);
            } else {
                println!("{}", json);
            }
        }
        "summary" => print_summary(&AnalysisSummary::from(analysis.as_ref())),
        "detailed" => print_detailed_analysis(&analysis),
        other => bail!("Invalid format '{}'. Use: json, summary, or detailed.", other),
    }

    Ok(())
}

fn apply_suggestion(
    analyzer: &GasAnalyzer,
    analysis: &AnalysisResult,
    source: &str,
    file_path: &str,
    id: &str,
    matches: &ArgMatches,
) -> Result<()> {
    let suggestion = analysis
        .suggestion(id)
        .ok_or_else(|| anyhow!("No suggestion with id '{}'", id))?;
    if !suggestion.auto_fix_available {
        eprintln!("[WARN] '{}' is not marked auto-fixable; review the result by hand.", id);
    }

    let rewritten = analyzer.apply_optimization(suggestion, source)?;
    let after = analyzer.analyze(&rewritten, file_path);

    let (start, end) = (suggestion.range.start_line, suggestion.range.end_line);
    println!("APPLIED {}", suggestion.id);
    println!("━━━━━━━━━━━━━━━━");
    println!("{}", suggestion.title);
    println!(
        "Total Estimate: {} -> {} gas",
        analysis.total_gas_cost, after.total_gas_cost
    );
    println!(
        "Lines {}-{}: {} -> {} gas",
        start,
        end,
        analysis.cost_in_lines(start, end),
        after.cost_in_lines(start, end)
    );

    match matches.get_one::<String>("output") {
        Some(output_file) => {
            fs::write(output_file, &rewritten)
                .with_context(|| format!("Failed to write '{}'", output_file))?;
            eprintln!("[OK] Rewritten source saved to: {}", output_file);
        }
        None => {
            println!();
            println!("{}", rewritten);
        }
    }
    println!("Note: {}", HEURISTIC_DISCLAIMER);
    Ok(())
}

fn print_summary(summary: &AnalysisSummary) {
    println!("GAS SUMMARY");
    println!("━━━━━━━━━━━━━━━━");
    println!("Estimated Cost: {} gas", summary.total_gas_cost);
    println!(
        "After Suggestions: {} gas (saves ~{})",
        summary.optimized_gas_cost, summary.total_savings
    );
    println!("Cost Entries: {}", summary.estimate_count);
    println!("Functions: {}", summary.function_count);
    println!(
        "Suggestions: {} ({} auto-fixable)",
        summary.suggestion_count, summary.auto_fixable_count
    );
    if let Some((ref name, cost)) = summary.most_expensive_function {
        println!("Most Expensive Function: {} (~{} gas)", name, cost);
    }
    if let Some(line) = summary.hottest_line {
        println!("Hottest Line: {}", line);
    }
    println!();
    println!("Note: {}", summary.disclaimer);
}

fn print_detailed_analysis(analysis: &AnalysisResult) {
    println!("DETAILED GAS REPORT");
    println!("===================");

    print_function_breakdown(analysis);
    print_heatmap(analysis);
    print_suggestions(&analysis.optimizations);

    println!();
    println!(
        "Total: {} gas, optimized: {} gas, savings: {} gas",
        analysis.total_gas_cost, analysis.optimized_gas_cost, analysis.total_savings
    );
    println!("Note: {}", HEURISTIC_DISCLAIMER);
}

fn print_function_breakdown(analysis: &AnalysisResult) {
    println!("\nFUNCTION BREAKDOWN");
    println!("━━━━━━━━━━━━━━━━━━━━");
    if analysis.function_breakdown.is_empty() {
        println!("[INFO] No functions detected.");
        return;
    }
    let mut functions: Vec<_> = analysis.function_breakdown.iter().collect();
    functions.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (name, cost) in functions {
        println!("  {:<32} {:>10} gas", name, cost);
    }
    let outside = analysis
        .total_gas_cost
        .saturating_sub(analysis.function_breakdown.values().sum::<u64>());
    if outside > 0 {
        println!("  {:<32} {:>10} gas", "(outside functions)", outside);
    }
}

fn print_heatmap(analysis: &AnalysisResult) {
    println!("\nHOT LINES (Top 10)");
    println!("━━━━━━━━━━━━━━━━━━━━");
    if analysis.heatmap_data.is_empty() {
        println!("[INFO] No costed lines.");
        return;
    }
    let mut points: Vec<_> = analysis.heatmap_data.iter().collect();
    points.sort_by(|a, b| b.gas_cost.cmp(&a.gas_cost).then(a.line.cmp(&b.line)));
    for point in points.into_iter().take(10) {
        let bar = "#".repeat((point.intensity * 20.0).round() as usize);
        println!(
            "  line {:>5} {:<20} [{}] {}",
            point.line, bar, point.category, point.description
        );
    }
}

fn print_suggestions(suggestions: &[OptimizationSuggestion]) {
    println!("\nOPTIMIZATION SUGGESTIONS");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if suggestions.is_empty() {
        println!("[INFO] Nothing to suggest.");
        return;
    }
    for s in suggestions {
        let impact_text = match s.impact {
            Impact::Low => "[LOW]",
            Impact::Medium => "[MEDIUM]",
            Impact::High => "[HIGH]",
        };
        let difficulty_text = match s.difficulty {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        println!("  {} {} (saves ~{} gas)", impact_text, s.title, s.savings);
        println!(
            "    Id: {}  Line: {}  Category: {}  Difficulty: {}{}",
            s.id,
            s.range.start_line,
            s.category.as_str(),
            difficulty_text,
            if s.auto_fix_available { "  [auto-fix]" } else { "" }
        );
        println!("    Before: {}", s.before_code.replace('\n', "\n            "));
        println!("    After:  {}", s.after_code.replace('\n', "\n            "));
    }
}
