use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use tracing::debug;

use onestore_format::{DecodeConfig, FileNodeList, MappedSource, RevisionStoreFile};
use onestore_graph::{Package, PropertyValue, RevisionStoreObject, RevisionStoreObjectGroup};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => DecodeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DecodeConfig::default(),
    };
    match cli.command {
        Command::Inspect(args) => cmd_inspect(args, config, cli.format),
        Command::Package(args) => cmd_package(args, &config, cli.format),
    }
}

fn cmd_inspect(
    args: InspectArgs,
    mut config: DecodeConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if args.strict {
        config.strict_node_kinds = true;
    }
    let source = MappedSource::open(&args.file)
        .with_context(|| format!("opening {}", args.file.display()))?;
    let file = RevisionStoreFile::open(source, config)
        .with_context(|| format!("decoding revision store {}", args.file.display()))?;
    let lists = if args.all {
        file.all_lists()?
    } else {
        vec![file.root().clone()]
    };
    let unparsed: usize = lists.iter().map(FileNodeList::unparsed_count).sum();
    debug!(lists = lists.len(), unparsed, "revision store decoded");
    let header = file.header();

    if format == OutputFormat::Json {
        let value = json!({
            "file_type": header.file_type(),
            "guid_file": header.guid_file.to_string(),
            "transactions": header.c_transactions_in_log,
            "expected_length": header.cb_expected_file_length,
            "lists": lists.iter().map(|list| json!({
                "list_id": list.list_id,
                "fragments": list.fragments().len(),
                "nodes": list.nodes().map(|n| n.id().to_string()).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
            "unparsed": unparsed,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let kind = match header.file_type() {
        Some(t) => format!("{t:?} (.{})", t.extension()),
        None => "unknown".to_string(),
    };
    println!("{} {}", "File:".bold(), args.file.display());
    println!("  Type: {}", kind.cyan());
    println!("  GUID: {}", header.guid_file.to_string().yellow());
    println!("  Transactions: {}", header.c_transactions_in_log);
    println!("  Expected length: {} bytes", header.cb_expected_file_length);
    for list in &lists {
        println!(
            "\n{} {} ({} nodes, {} fragments)",
            "List".bold(),
            format!("{:#x}", list.list_id).yellow(),
            list.len(),
            list.fragments().len()
        );
        for node in list.nodes() {
            let name = node.id().to_string();
            if node.is_recognized() {
                println!("  {name} [{} bytes]", node.size());
            } else {
                println!("  {} [{} bytes]", name.red(), node.size());
            }
        }
    }
    if unparsed == 0 {
        println!("\n{} All nodes decoded.", "✓".green().bold());
    } else {
        println!("\n{} {} nodes kept undecoded.", "!".yellow().bold(), unparsed);
    }
    Ok(())
}

fn cmd_package(
    args: PackageArgs,
    config: &DecodeConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let package = Package::decode(&bytes, config)
        .with_context(|| format!("decoding package {}", args.file.display()))?;
    debug!(
        bytes = bytes.len(),
        revisions = package.revision_manifests.len(),
        groups = package.groups().count(),
        "package decoded"
    );

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&package)?);
        return Ok(());
    }

    let index = &package.storage_index;
    println!("{} {}", "Package:".bold(), args.file.display());
    println!(
        "  Storage index: {} cell mappings, {} revision mappings",
        index.cell_mappings.len(),
        index.revision_mappings.len()
    );
    println!("  Schema: {}", package.storage_manifest.schema_guid.to_string().yellow());
    for root in &package.storage_manifest.roots {
        println!("  Root {} -> cell {}", root.root_id.to_string().cyan(), root.cell_id);
    }
    println!("  Revisions: {}", package.revision_manifests.len());

    match &package.header_cell {
        Some(header) => println!(
            "  Header cell: object {} with {} properties",
            header.object_id,
            header.property_set.body.values.len()
        ),
        None => println!("  Header cell: {}", "absent".dimmed()),
    }

    print_groups("Data root", &package.data_roots, args.objects);
    print_groups("Other", &package.other_groups, args.objects);
    Ok(())
}

fn print_groups(label: &str, groups: &[RevisionStoreObjectGroup], objects: bool) {
    for group in groups {
        if group.is_encrypted() {
            println!(
                "\n{} group {} ({} encrypted records)",
                label.bold(),
                group.group_id.to_string().yellow(),
                group.encryption_objects.len()
            );
            continue;
        }
        println!(
            "\n{} group {} ({} objects)",
            label.bold(),
            group.group_id.to_string().yellow(),
            group.objects.len()
        );
        if objects {
            for object in &group.objects {
                println!("  {}", describe(object));
            }
        }
    }
}

fn describe(object: &RevisionStoreObject) -> String {
    let class = object
        .jcid
        .map(|j| format!("{:#06x}", j.index()))
        .unwrap_or_else(|| "-".to_string());
    if let Some(data) = &object.file_data {
        let preview = hex::encode(&data[..data.len().min(16)]);
        return format!("{} class {class} file data {} bytes [{preview}]", object.id, data.len());
    }
    if let Some(file) = &object.file_data_object {
        let size = file.data.as_ref().map_or(0, Vec::len);
        return format!("{} blob {} ({size} bytes)", object.id, file.reference.blob_id);
    }
    let props = object.property_set.as_ref().map(|p| &p.body.values[..]).unwrap_or_default();
    let references = props
        .iter()
        .filter(|(_, v)| matches!(v, PropertyValue::ObjectId(_) | PropertyValue::ObjectIds(_)))
        .count();
    format!(
        "{} class {class} {} properties, {references} object references, {} referenced objects",
        object.id,
        props.len(),
        object.referenced_object_ids.len()
    )
}
