//! 寄存器分配。
//!
//! 不开优化时每个值都落在栈上（取值时借 scratch 寄存器）；
//! 开 `-O` 后做基本块活跃性分析 + 图着色，
//! 跨调用存活的值只用被调用者保存寄存器。

use std::collections::{HashMap, HashSet};

use koopa::ir::{BasicBlock, FunctionData, Value, ValueKind};

use crate::back::insts::Reg;
use crate::back::target::TargetRegInfo;

/// 一个 IR 值的落点。
#[derive(Clone, Copy, Debug)]
pub enum Loc {
    Reg(Reg),
    Stack,
}

pub fn allocate(
    func_data: &FunctionData,
    target: &TargetRegInfo,
    optimize: bool,
) -> HashMap<Value, Loc> {
    let candidates = collect_candidates(func_data);
    if !optimize {
        return candidates.into_iter().map(|v| (v, Loc::Stack)).collect();
    }

    let (succ, order) = build_cfg(func_data);
    let (use_map, def_map) = block_use_def(func_data, &candidates);
    let (live_in, live_out) = liveness(&order, &succ, &use_map, &def_map);
    let across_call = live_across_calls(func_data, &candidates, &live_out);
    let graph = interference(func_data, &candidates, &live_out);
    color(&candidates, &graph, target, &across_call)
}

/// 参与分配的值：形参 + 有结果的指令。alloc 的落点是专门的栈槽，
/// 不进分配器。
fn collect_candidates(func_data: &FunctionData) -> HashSet<Value> {
    let mut values = HashSet::new();
    for &param in func_data.params() {
        values.insert(param);
    }
    for (_bb, node) in func_data.layout().bbs() {
        for &inst in node.insts().keys() {
            let data = func_data.dfg().value(inst);
            if data.ty().is_unit() || matches!(data.kind(), ValueKind::Alloc(_)) {
                continue;
            }
            values.insert(inst);
        }
    }
    values
}

/// 指令用到的值（不含基本块引用）。
pub fn operands_of(kind: &ValueKind) -> Vec<Value> {
    match kind {
        ValueKind::Return(ret) => ret.value().into_iter().collect(),
        ValueKind::Binary(bin) => vec![bin.lhs(), bin.rhs()],
        ValueKind::Load(load) => vec![load.src()],
        ValueKind::Store(store) => vec![store.value(), store.dest()],
        ValueKind::Branch(br) => vec![br.cond()],
        ValueKind::Call(call) => call.args().to_vec(),
        ValueKind::GetElemPtr(gep) => vec![gep.src(), gep.index()],
        ValueKind::GetPtr(gp) => vec![gp.src(), gp.index()],
        _ => Vec::new(),
    }
}

fn build_cfg(
    func_data: &FunctionData,
) -> (HashMap<BasicBlock, Vec<BasicBlock>>, Vec<BasicBlock>) {
    let mut order = Vec::new();
    let mut succ = HashMap::new();
    for (bb, node) in func_data.layout().bbs() {
        order.push(*bb);
        let mut succs = Vec::new();
        if let Some(&inst) = node.insts().keys().last() {
            match func_data.dfg().value(inst).kind() {
                ValueKind::Branch(br) => {
                    succs.push(br.true_bb());
                    succs.push(br.false_bb());
                }
                ValueKind::Jump(jump) => succs.push(jump.target()),
                _ => {}
            }
        }
        succ.insert(*bb, succs);
    }
    (succ, order)
}

fn block_use_def(
    func_data: &FunctionData,
    candidates: &HashSet<Value>,
) -> (
    HashMap<BasicBlock, HashSet<Value>>,
    HashMap<BasicBlock, HashSet<Value>>,
) {
    let mut use_map = HashMap::new();
    let mut def_map = HashMap::new();
    for (bb, node) in func_data.layout().bbs() {
        let mut used = HashSet::new();
        let mut defined = HashSet::new();
        for &inst in node.insts().keys() {
            for op in operands_of(func_data.dfg().value(inst).kind()) {
                if candidates.contains(&op) && !defined.contains(&op) {
                    used.insert(op);
                }
            }
            if candidates.contains(&inst) {
                defined.insert(inst);
            }
        }
        use_map.insert(*bb, used);
        def_map.insert(*bb, defined);
    }
    (use_map, def_map)
}

fn liveness(
    order: &[BasicBlock],
    succ: &HashMap<BasicBlock, Vec<BasicBlock>>,
    use_map: &HashMap<BasicBlock, HashSet<Value>>,
    def_map: &HashMap<BasicBlock, HashSet<Value>>,
) -> (
    HashMap<BasicBlock, HashSet<Value>>,
    HashMap<BasicBlock, HashSet<Value>>,
) {
    let mut live_in: HashMap<BasicBlock, HashSet<Value>> = HashMap::new();
    let mut live_out: HashMap<BasicBlock, HashSet<Value>> = HashMap::new();
    for bb in order {
        live_in.insert(*bb, HashSet::new());
        live_out.insert(*bb, HashSet::new());
    }

    let mut changed = true;
    while changed {
        changed = false;
        for bb in order.iter().rev() {
            let mut out = HashSet::new();
            for s in &succ[bb] {
                if let Some(live) = live_in.get(s) {
                    out.extend(live.iter().copied());
                }
            }
            let mut inn: HashSet<Value> = use_map[bb].clone();
            for v in &out {
                if !def_map[bb].contains(v) {
                    inn.insert(*v);
                }
            }
            if out != live_out[bb] || inn != live_in[bb] {
                live_out.insert(*bb, out);
                live_in.insert(*bb, inn);
                changed = true;
            }
        }
    }
    (live_in, live_out)
}

/// 跨越 call 指令仍然活跃的值：只能放被调用者保存寄存器。
fn live_across_calls(
    func_data: &FunctionData,
    candidates: &HashSet<Value>,
    live_out: &HashMap<BasicBlock, HashSet<Value>>,
) -> HashSet<Value> {
    let mut across = HashSet::new();
    for (bb, node) in func_data.layout().bbs() {
        let mut live = live_out[bb].clone();
        let insts: Vec<Value> = node.insts().keys().copied().collect();
        for &inst in insts.iter().rev() {
            let kind = func_data.dfg().value(inst).kind();
            if matches!(kind, ValueKind::Call(_)) {
                across.extend(live.iter().copied());
            }
            let ops = operands_of(kind);
            live.remove(&inst);
            for op in ops {
                if candidates.contains(&op) {
                    live.insert(op);
                }
            }
        }
    }
    across
}

fn interference(
    func_data: &FunctionData,
    candidates: &HashSet<Value>,
    live_out: &HashMap<BasicBlock, HashSet<Value>>,
) -> HashMap<Value, HashSet<Value>> {
    let mut graph: HashMap<Value, HashSet<Value>> = HashMap::new();
    for v in candidates {
        graph.insert(*v, HashSet::new());
    }
    let mut add_edge = |graph: &mut HashMap<Value, HashSet<Value>>, a: Value, b: Value| {
        if a == b {
            return;
        }
        if let Some(n) = graph.get_mut(&a) {
            n.insert(b);
        }
        if let Some(n) = graph.get_mut(&b) {
            n.insert(a);
        }
    };

    for (bb, node) in func_data.layout().bbs() {
        let mut live = live_out[bb].clone();
        let insts: Vec<Value> = node.insts().keys().copied().collect();
        for &inst in insts.iter().rev() {
            let ops = operands_of(func_data.dfg().value(inst).kind());
            if candidates.contains(&inst) {
                for v in &live {
                    add_edge(&mut graph, inst, *v);
                }
                live.remove(&inst);
            }
            for op in ops {
                if candidates.contains(&op) {
                    live.insert(op);
                }
            }
        }
    }
    // 形参在入口处同时活跃
    let params: Vec<Value> = func_data
        .params()
        .iter()
        .copied()
        .filter(|p| candidates.contains(p))
        .collect();
    for i in 0..params.len() {
        for j in (i + 1)..params.len() {
            add_edge(&mut graph, params[i], params[j]);
        }
    }
    graph
}

/// Chaitin 风格着色：反复摘掉低度数结点，着色失败的值回落栈上。
fn color(
    candidates: &HashSet<Value>,
    graph: &HashMap<Value, HashSet<Value>>,
    target: &TargetRegInfo,
    across_call: &HashSet<Value>,
) -> HashMap<Value, Loc> {
    let k = target.allocatable.len();
    let mut remaining: HashSet<Value> = candidates.clone();
    let mut degrees: HashMap<Value, usize> = candidates
        .iter()
        .map(|v| (*v, graph.get(v).map(|n| n.len()).unwrap_or(0)))
        .collect();
    let mut stack = Vec::new();

    while !remaining.is_empty() {
        let pick = remaining
            .iter()
            .find(|v| degrees[*v] < k)
            .copied()
            .or_else(|| {
                remaining
                    .iter()
                    .min_by_key(|v| degrees[*v])
                    .copied()
            })
            .expect("non-empty remaining set");
        remaining.remove(&pick);
        stack.push(pick);
        if let Some(neighbors) = graph.get(&pick) {
            for n in neighbors {
                if let Some(d) = degrees.get_mut(n) {
                    *d = d.saturating_sub(1);
                }
            }
        }
    }

    let mut locations: HashMap<Value, Loc> = HashMap::new();
    while let Some(v) = stack.pop() {
        let mut taken = HashSet::new();
        if let Some(neighbors) = graph.get(&v) {
            for n in neighbors {
                if let Some(Loc::Reg(r)) = locations.get(n) {
                    taken.insert(*r);
                }
            }
        }
        let mut available = target.allocatable.clone();
        if across_call.contains(&v) {
            available.retain(|r| !target.caller_saved.contains(r));
        }
        available.retain(|r| !taken.contains(r));
        match available.first() {
            Some(&reg) => locations.insert(v, Loc::Reg(reg)),
            None => locations.insert(v, Loc::Stack),
        };
    }
    locations
}
