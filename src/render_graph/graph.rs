//! Render graph definition and compilation

use crate::backend::traits::BackendError;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Errors raised while compiling or running a render graph
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Render graph contains a cycle through passes: {0:?}")]
    Cycle(Vec<String>),
    #[error("Resource {0:?} is not allocated")]
    MissingResource(ResourceId),
    #[error("Unknown pass {0:?}")]
    UnknownPass(PassId),
    #[error("Pass '{pass}' reads history of '{resource}' and writes it in the same pass")]
    HistoryReadWrite { pass: String, resource: String },
    #[error("History of '{resource}' is overwritten by '{writer}' before '{reader}' reads it")]
    HistoryOverwrittenBeforeRead {
        resource: String,
        reader: String,
        writer: String,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// The main render graph structure
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    pass_nodes: Vec<PassNode>,
    resources: Vec<VirtualResource>,
    explicit_dependencies: Vec<(PassId, PassId)>,
    next_pass_id: u32,
    next_resource_id: u32,
    screen_width: u32,
    screen_height: u32,

    // External resources (like swapchain)
}

impl RenderGraph {
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            resources: Vec::new(),
            explicit_dependencies: Vec::new(),
            next_pass_id: 0,
            next_resource_id: 0,
            screen_width,
            screen_height,
        }
    }

    /// Register an external resource (like swapchain image)
    pub fn register_external(&mut self, name: &str) -> ResourceId {
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        self.resources.push(VirtualResource::External {
            id,
            name: name.to_string(),
        });
        id
    }

    /// Add a render pass to the graph
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P, pass_type: PassType) -> PassId {
        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;

        let name = pass.name().to_string();
        let mut boxed_pass = Box::new(pass);

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        {
            let mut ctx = PassSetupContext {
                resources: &mut self.resources,
                inputs: &mut inputs,
                outputs: &mut outputs,
                next_resource_id: &mut self.next_resource_id,
                screen_width: self.screen_width,
                screen_height: self.screen_height,
            };
            boxed_pass.setup(&mut ctx);
        }

        self.passes.push(boxed_pass);
        self.pass_nodes.push(PassNode {
            id,
            name,
            pass_type,
            inputs,
            outputs,
        });

        id
    }

    /// Force `after` to run later than `before` even without a shared resource
    pub fn add_dependency(&mut self, before: PassId, after: PassId) {
        self.explicit_dependencies.push((before, after));
    }

    /// Order the passes and validate history accesses.
    ///
    /// Edges come from three sources: a reader depends on every writer of a
    /// resource it reads, every writer of a resource depends on the passes
    /// that read its history, and explicit dependencies. Ties are broken by
    /// pass id so the order is stable between compilations.
    pub fn compile(&self) -> Result<CompiledGraph, GraphError> {
        let mut dependencies: HashMap<PassId, BTreeSet<PassId>> = self
            .pass_nodes
            .iter()
            .map(|n| (n.id, BTreeSet::new()))
            .collect();

        for node in &self.pass_nodes {
            for resource in node.history_reads() {
                if node.writes_resource(resource) {
                    return Err(GraphError::HistoryReadWrite {
                        pass: node.name.clone(),
                        resource: self.resource_name(resource).to_string(),
                    });
                }
            }
        }

        for reader in &self.pass_nodes {
            for writer in &self.pass_nodes {
                if reader.id == writer.id {
                    continue;
                }

                for input in &reader.inputs {
                    if !writer.writes_resource(input.resource) {
                        continue;
                    }
                    if input.is_history_read() {
                        insert_edge(&mut dependencies, reader.id, writer.id);
                    } else {
                        insert_edge(&mut dependencies, writer.id, reader.id);
                    }
                }
            }
        }

        for &(before, after) in &self.explicit_dependencies {
            if self.get_pass_node(before).is_none() {
                return Err(GraphError::UnknownPass(before));
            }
            if self.get_pass_node(after).is_none() {
                return Err(GraphError::UnknownPass(after));
            }
            insert_edge(&mut dependencies, before, after);
        }

        // Kahn's algorithm, lowest id first
        let mut in_degree: HashMap<PassId, usize> = dependencies
            .iter()
            .map(|(&id, deps)| (id, deps.len()))
            .collect();

        let mut ready: BTreeSet<PassId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut sorted_passes = Vec::with_capacity(self.pass_nodes.len());

        while let Some(pass_id) = ready.pop_first() {
            sorted_passes.push(pass_id);

            for node in &self.pass_nodes {
                if dependencies[&node.id].contains(&pass_id) {
                    if let Some(degree) = in_degree.get_mut(&node.id) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(node.id);
                        }
                    }
                }
            }
        }

        if sorted_passes.len() != self.pass_nodes.len() {
            let stuck = self
                .pass_nodes
                .iter()
                .filter(|n| !sorted_passes.contains(&n.id))
                .map(|n| n.name.clone())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }

        let compiled = CompiledGraph {
            pass_order: sorted_passes,
        };
        self.validate_history_order(&compiled)?;

        log::debug!(
            "Compiled render graph: {}",
            compiled
                .pass_order
                .iter()
                .filter_map(|&id| self.get_pass_node(id).map(|n| n.name.as_str()))
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Ok(compiled)
    }

    /// Check that every history read happens before the resource is written
    /// again in the same frame.
    pub fn validate_history_order(&self, compiled: &CompiledGraph) -> Result<(), GraphError> {
        for reader in &self.pass_nodes {
            for resource in reader.history_reads() {
                let Some(read_at) = compiled.position(reader.id) else {
                    continue;
                };

                for writer in self.pass_nodes.iter().filter(|n| n.writes_resource(resource)) {
                    let write_at = compiled.position(writer.id).unwrap_or(usize::MAX);
                    if write_at <= read_at {
                        return Err(GraphError::HistoryOverwrittenBeforeRead {
                            resource: self.resource_name(resource).to_string(),
                            reader: reader.name.clone(),
                            writer: writer.name.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    fn resource_name(&self, id: ResourceId) -> &str {
        self.resources
            .iter()
            .find(|r| r.id() == id)
            .map(|r| r.name())
            .unwrap_or("<unknown>")
    }

    /// Get mutable passes
    pub fn passes_mut(&mut self) -> &mut [Box<dyn RenderPass>] {
        &mut self.passes
    }

    /// Get all resources
    pub fn resources(&self) -> &[VirtualResource] {
        &self.resources
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    /// Get pass by ID
    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass> {
        let index = self.pass_nodes.iter().position(|n| n.id == id)?;
        Some(self.passes[index].as_ref())
    }

    /// Get a pass downcast to its concrete type
    pub fn pass_as<P: RenderPass + 'static>(&self, id: PassId) -> Option<&P> {
        self.get_pass(id)?.as_any().downcast_ref::<P>()
    }

    /// Get pass node by ID
    pub fn get_pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.pass_nodes.iter().find(|n| n.id == id)
    }
}

fn insert_edge(dependencies: &mut HashMap<PassId, BTreeSet<PassId>>, before: PassId, after: PassId) {
    if let Some(deps) = dependencies.get_mut(&after) {
        deps.insert(before);
    }
}

/// Compiled render graph with execution order
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
}

impl CompiledGraph {
    /// Position of a pass in execution order
    pub fn position(&self, pass: PassId) -> Option<usize> {
        self.pass_order.iter().position(|&p| p == pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{TextureFormat, TextureUsage};

    /// Pass that only declares accesses
    struct TestPass {
        name: &'static str,
        creates: Option<(&'static str, bool)>,
        reads: Vec<(ResourceId, ResourceUsage)>,
        writes: Vec<(ResourceId, ResourceUsage)>,
        created: Option<ResourceId>,
    }

    impl TestPass {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                creates: None,
                reads: Vec::new(),
                writes: Vec::new(),
                created: None,
            }
        }

        fn creating(mut self, resource: &'static str, history: bool) -> Self {
            self.creates = Some((resource, history));
            self
        }

        fn reading(mut self, id: ResourceId, usage: ResourceUsage) -> Self {
            self.reads.push((id, usage));
            self
        }

        fn writing(mut self, id: ResourceId, usage: ResourceUsage) -> Self {
            self.writes.push((id, usage));
            self
        }
    }

    impl RenderPass for TestPass {
        fn name(&self) -> &str {
            self.name
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            if let Some((name, history)) = self.creates {
                let usage = TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING;
                let id = if history {
                    ctx.create_history_texture(name, TextureFormat::Rg11b10Float, usage)
                } else {
                    ctx.create_texture_relative(name, TextureSize::default(), TextureFormat::R16Float, usage)
                };
                ctx.write(id, ResourceUsage::RenderTarget);
                self.created = Some(id);
            }
            for &(id, usage) in &self.reads {
                ctx.read(id, usage);
            }
            for &(id, usage) in &self.writes {
                ctx.write(id, usage);
            }
        }

        fn execute(&self, _ctx: &mut PassExecuteContext) -> Result<(), GraphError> {
            Ok(())
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    fn created(graph: &RenderGraph, pass: PassId) -> ResourceId {
        graph.pass_as::<TestPass>(pass).and_then(|p| p.created).unwrap()
    }

    fn names(graph: &RenderGraph, compiled: &CompiledGraph) -> Vec<String> {
        compiled
            .pass_order
            .iter()
            .map(|&id| graph.get_pass_node(id).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn test_readers_run_after_writers() {
        let mut graph = RenderGraph::new(8, 8);
        let depth = graph.add_pass(TestPass::new("depth").creating("device_depth", false), PassType::Graphics);
        let depth_id = created(&graph, depth);
        // Added before its producer on purpose
        let shadows = graph.register_external("shadows");
        graph.add_pass(
            TestPass::new("combine").reading(shadows, ResourceUsage::TextureRead),
            PassType::Graphics,
        );
        graph.add_pass(
            TestPass::new("march")
                .reading(depth_id, ResourceUsage::TextureRead)
                .writing(shadows, ResourceUsage::RenderTarget),
            PassType::Graphics,
        );

        let compiled = graph.compile().unwrap();
        assert_eq!(names(&graph, &compiled), ["depth", "march", "combine"]);
    }

    #[test]
    fn test_history_read_runs_before_overwrite() {
        let mut graph = RenderGraph::new(8, 8);
        let history_owner = graph.add_pass(TestPass::new("history").creating("history", true), PassType::Graphics);
        let history = created(&graph, history_owner);
        let copy = graph.add_pass(
            TestPass::new("copy").writing(history, ResourceUsage::CopyDst),
            PassType::Transfer,
        );
        let resolve = graph.add_pass(
            TestPass::new("resolve").reading(history, ResourceUsage::HistoryRead),
            PassType::Graphics,
        );

        let compiled = graph.compile().unwrap();
        let resolve_at = compiled.position(resolve).unwrap();
        assert!(resolve_at < compiled.position(copy).unwrap());
        assert!(resolve_at < compiled.position(history_owner).unwrap());
        graph.validate_history_order(&compiled).unwrap();
    }

    #[test]
    fn test_manual_order_violating_history_is_rejected() {
        let mut graph = RenderGraph::new(8, 8);
        let history = graph.register_external("history");
        let copy = graph.add_pass(
            TestPass::new("copy").writing(history, ResourceUsage::CopyDst),
            PassType::Transfer,
        );
        let resolve = graph.add_pass(
            TestPass::new("resolve").reading(history, ResourceUsage::HistoryRead),
            PassType::Graphics,
        );

        let manual = CompiledGraph {
            pass_order: vec![copy, resolve],
        };
        assert!(matches!(
            graph.validate_history_order(&manual),
            Err(GraphError::HistoryOverwrittenBeforeRead { .. })
        ));
    }

    #[test]
    fn test_history_read_and_write_in_one_pass_is_rejected() {
        let mut graph = RenderGraph::new(8, 8);
        let history = graph.register_external("history");
        graph.add_pass(
            TestPass::new("resolve")
                .reading(history, ResourceUsage::HistoryRead)
                .writing(history, ResourceUsage::RenderTarget),
            PassType::Graphics,
        );
        assert!(matches!(graph.compile(), Err(GraphError::HistoryReadWrite { .. })));
    }

    #[test]
    fn test_explicit_dependency_cycle_is_detected() {
        let mut graph = RenderGraph::new(8, 8);
        let a = graph.add_pass(TestPass::new("a"), PassType::Graphics);
        let b = graph.add_pass(TestPass::new("b"), PassType::Graphics);
        graph.add_dependency(a, b);
        graph.add_dependency(b, a);

        match graph.compile() {
            Err(GraphError::Cycle(passes)) => assert_eq!(passes, ["a", "b"]),
            other => panic!("expected cycle, got {:?}", other.map(|c| c.pass_order)),
        }
    }

    #[test]
    fn test_independent_passes_keep_insertion_order() {
        let mut graph = RenderGraph::new(8, 8);
        for name in ["first", "second", "third"] {
            graph.add_pass(TestPass::new(name), PassType::Graphics);
        }
        let compiled = graph.compile().unwrap();
        assert_eq!(names(&graph, &compiled), ["first", "second", "third"]);
    }
}
